//! Remote task modules
//!
//! A `uses` value that looks like a module reference (`github.com/owner/repo`,
//! `jsr:@scope/pkg`, `./tasks/lint.task`, ...) is resolved to a local path by a
//! [`ModuleResolver`] and then run either from its manifest or through a
//! generated Deno wrapper.

use crate::env::{Env, ExpandOptions};
use crate::error::{ExecutionError, ExecutionResult};
use crate::handlers::process::{self, RunOptions};
use crate::runner::{TaskContext, TaskResult};
use crate::utils::{env_key, resolve_path};
use crate::value::{Mapping, Value};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use indexmap::IndexMap;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, instrument};

/// Registry key of the remote module handler
pub const REMOTE_HANDLER: &str = "remote";

/// Overrides the project-local fallback task directory
pub const TASKS_DIR_VAR: &str = "CAST_TASKS_DIR";

/// File names recognized as a module manifest inside a directory
pub const MANIFEST_NAMES: &[&str] = &["cast.task", "casttask.yaml", "casttask.yml", "cast.yaml"];

/// Script entrypoints tried when a directory has no manifest
pub const ENTRYPOINTS: &[&str] = &["mod.ts", "main.ts", "index.ts", "mod.js", "main.js", "index.js"];

const MANIFEST_SUFFIXES: &[&str] = &[".task", ".yaml", ".yml"];

/// Whether `uses` names a module rather than a registered handler
pub fn is_remote_uri(uses: &str) -> bool {
    const PREFIXES: &[&str] = &[
        "github.com/",
        "https://",
        "http://",
        "jsr:",
        "npm:",
        "@",
        "file://",
        "./",
        "../",
        "/",
        ".\\",
        "..\\",
    ];
    PREFIXES.iter().any(|p| uses.starts_with(p))
        || MANIFEST_SUFFIXES.iter().any(|s| uses.ends_with(s))
        || Path::new(uses).is_absolute()
}

/// Whether Deno resolves `uses` itself
fn is_package(uses: &str) -> bool {
    uses.starts_with("jsr:") || uses.starts_with("npm:") || uses.starts_with('@')
}

/// Whether `uri` is allowed by `trusted`
///
/// An empty list trusts everything. Entries match as prefixes or as globs
/// where `*` and `?` do not cross `/`.
pub fn is_trusted(uri: &str, trusted: &[String]) -> bool {
    if trusted.is_empty() {
        return true;
    }
    if trusted.iter().any(|prefix| uri.starts_with(prefix.as_str())) {
        return true;
    }
    trusted_globs(trusted).is_match(uri)
}

/// Glob set over `trusted`; invalid patterns only match as prefixes
fn trusted_globs(trusted: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in trusted {
        match GlobBuilder::new(pattern).literal_separator(true).build() {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => debug!(pattern = %pattern, error = %e, "ignoring invalid trusted source glob"),
        }
    }
    builder.build().unwrap_or_else(|_| GlobSet::empty())
}

/// Resolves module references to local paths, fetching them if needed
pub trait ModuleResolver: Send + Sync {
    fn resolve(&self, uri: &str, trusted: &[String], project_dir: &Path) -> ExecutionResult<PathBuf>;
}

/// Resolver for local paths and git repositories
///
/// Repositories are shallow-cloned once into `<cache>/<sha256(uri)>`; the
/// cache defaults to `<project>/.cast/tasks`.
#[derive(Debug, Clone, Default)]
pub struct GitResolver {
    cache_dir: Option<PathBuf>,
}

/// A parsed git module reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSource {
    pub url: String,
    pub subpath: String,
    pub reference: Option<String>,
}

impl GitSource {
    /// Parse `github.com/owner/repo[/sub/path][@ref]` or
    /// `https://host/owner/repo.git[/sub/path][@ref]`
    pub fn parse(uri: &str) -> ExecutionResult<Self> {
        let (path, reference) = match uri.rsplit_once('@') {
            Some((path, reference)) if !reference.contains('/') && !path.ends_with(':') => {
                (path, Some(reference.to_string()))
            }
            _ => (uri, None),
        };

        let (scheme, rest) = match path.split_once("://") {
            Some((scheme, rest)) => (scheme, rest),
            None => ("https", path),
        };

        let parts: Vec<&str> = rest.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() < 3 {
            return Err(ExecutionError::Remote(format!("invalid git module URI '{}'", uri)));
        }

        let repo = parts[2].trim_end_matches(".git");
        Ok(GitSource {
            url: format!("{}://{}/{}/{}.git", scheme, parts[0], parts[1], repo),
            subpath: parts[3..].join("/"),
            reference,
        })
    }
}

impl GitResolver {
    pub fn with_cache_dir(dir: impl Into<PathBuf>) -> Self {
        GitResolver {
            cache_dir: Some(dir.into()),
        }
    }

    /// Cache directory name for a URI
    pub fn cache_key(uri: &str) -> String {
        hex::encode(Sha256::digest(uri.as_bytes()))
    }

    fn cache_root(&self, project_dir: &Path) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| project_dir.join(".cast").join("tasks"))
    }

    #[instrument(skip(self, project_dir))]
    fn fetch(&self, uri: &str, project_dir: &Path) -> ExecutionResult<PathBuf> {
        let source = GitSource::parse(uri)?;
        let root = self.cache_root(project_dir);
        let target = root.join(Self::cache_key(uri));

        if !target.exists() {
            fs::create_dir_all(&root).map_err(|e| {
                ExecutionError::Remote(format!("failed to create {}: {}", root.display(), e))
            })?;

            let mut args = vec!["clone".to_string(), "--depth".to_string(), "1".to_string()];
            if let Some(reference) = &source.reference {
                args.push("--branch".to_string());
                args.push(reference.clone());
            }
            args.push(source.url.clone());
            args.push(target.to_string_lossy().into_owned());

            info!(url = %source.url, "cloning remote task");
            let output = Command::new("git").args(&args).output().map_err(|e| {
                ExecutionError::Remote(format!("failed to run git: {}", e))
            })?;
            if !output.status.success() {
                return Err(ExecutionError::Remote(format!(
                    "failed to clone {}: {}",
                    source.url,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
        }

        Ok(if source.subpath.is_empty() {
            target
        } else {
            target.join(&source.subpath)
        })
    }
}

impl ModuleResolver for GitResolver {
    fn resolve(&self, uri: &str, trusted: &[String], project_dir: &Path) -> ExecutionResult<PathBuf> {
        if let Some(path) = uri.strip_prefix("file://") {
            return Ok(resolve_path(project_dir, path));
        }

        let is_git = uri.starts_with("github.com/")
            || ((uri.starts_with("https://") || uri.starts_with("http://")) && uri.contains(".git"));
        if is_git {
            if !is_trusted(uri, trusted) {
                return Err(ExecutionError::Remote(format!(
                    "remote task '{}' is not in trusted_sources",
                    uri
                )));
            }
            return self.fetch(uri, project_dir);
        }

        if uri.starts_with("https://") || uri.starts_with("http://") || is_package(uri) {
            return Err(ExecutionError::Remote(format!(
                "unsupported remote task URI: {}",
                uri
            )));
        }

        Ok(resolve_path(project_dir, uri))
    }
}

/// A module manifest
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TaskManifest {
    #[serde(default)]
    pub name: String,

    #[serde(default, alias = "description")]
    pub desc: Option<String>,

    #[serde(default)]
    pub inputs: IndexMap<String, ManifestInput>,

    pub runs: ManifestRuns,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ManifestInput {
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub default: Option<Value>,

    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ManifestRuns {
    pub using: String,

    #[serde(default)]
    pub image: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub main: Option<String>,
}

impl TaskManifest {
    pub fn load(path: &Path) -> ExecutionResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ExecutionError::Remote(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str(&content).map_err(|e| {
            ExecutionError::Remote(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// `INPUT_<NAME>` variables from the task's `with` values and defaults
    pub fn input_env(&self, with: &Mapping) -> ExecutionResult<Vec<(String, String)>> {
        let mut vars = Vec::new();
        for (name, input) in &self.inputs {
            let given = with.get(name).or_else(|| {
                with.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            });

            let value = match given.or(input.default.as_ref()) {
                Some(value) => value.to_string(),
                None if input.required => {
                    return Err(ExecutionError::InvalidParams(format!(
                        "remote task '{}' requires input '{}'",
                        self.name, name
                    )))
                }
                None => continue,
            };

            if !value.is_empty() {
                vars.push((format!("INPUT_{}", env_key(name)), value));
            }
        }
        Ok(vars)
    }
}

/// What a resolved module path turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Module {
    Manifest(PathBuf),

    /// Import specifier for the Deno wrapper
    Script(String),
}

/// Classify a resolved module path
pub fn locate(path: &Path) -> ExecutionResult<Module> {
    if path.is_dir() {
        if let Some(manifest) = MANIFEST_NAMES.iter().map(|n| path.join(n)).find(|p| p.is_file()) {
            return Ok(Module::Manifest(manifest));
        }
        if let Some(entry) = ENTRYPOINTS.iter().map(|n| path.join(n)).find(|p| p.is_file()) {
            return Ok(Module::Script(file_specifier(&entry)));
        }
        return Err(ExecutionError::Remote(format!(
            "no manifest or entrypoint found in {}",
            path.display()
        )));
    }

    if !path.is_file() {
        return Err(ExecutionError::Remote(format!(
            "remote task module not found: {}",
            path.display()
        )));
    }

    let name = path.to_string_lossy();
    if MANIFEST_SUFFIXES.iter().any(|s| name.ends_with(s)) {
        Ok(Module::Manifest(path.to_path_buf()))
    } else {
        Ok(Module::Script(file_specifier(path)))
    }
}

/// `file://` URL for an absolute path
pub fn file_specifier(path: &Path) -> String {
    let s = path.to_string_lossy().replace('\\', "/");
    if s.starts_with('/') {
        format!("file://{}", s)
    } else {
        format!("file:///{}", s)
    }
}

/// Deno program importing `specifier` and calling its lifecycle functions
pub fn wrapper_source(specifier: &str, with: &Mapping) -> String {
    let import = serde_json::to_string(specifier).unwrap_or_else(|_| format!("\"{}\"", specifier));
    let with_json = serde_json::to_string(with).unwrap_or_else(|_| "{}".to_string());

    format!(
        r#"import * as mod from {import};

const withArgs = {with_json};

for (const [key, value] of Object.entries(withArgs)) {{
  if (value !== null && value !== undefined) {{
    Deno.env.set(key, typeof value === "string" ? value : JSON.stringify(value));
  }}
}}

async function main() {{
  try {{
    if (typeof mod.setup === "function") {{
      await mod.setup();
    }}
    if (typeof mod.run === "function") {{
      await mod.run();
    }} else if (typeof mod.default === "function") {{
      await mod.default();
    }}
  }} finally {{
    if (typeof mod.teardown === "function") {{
      await mod.teardown();
    }}
  }}
}}

main().catch((err) => {{
  console.error(err);
  Deno.exit(1);
}});
"#
    )
}

/// Search the fallback task directories for a module named `uses`
///
/// Looks in `$CAST_TASKS_DIR` (default `<project>/.cast/tasks`), then in the
/// user data directory under `cast/tasks`.
pub fn find_task_file(uses: &str, project_dir: &Path, env: &Env) -> Option<PathBuf> {
    let mut roots = Vec::new();
    match env.get(TASKS_DIR_VAR).filter(|d| !d.is_empty()) {
        Some(dir) => roots.push(resolve_path(project_dir, dir)),
        None => roots.push(project_dir.join(".cast").join("tasks")),
    }
    if let Some(dirs) = directories::BaseDirs::new() {
        roots.push(dirs.data_dir().join("cast").join("tasks"));
    }

    let candidates = [
        format!("{}/cast.task", uses),
        format!("{}/cast.yaml", uses),
        format!("{}.yaml", uses),
        format!("{}.yml", uses),
        format!("{}.task", uses),
    ];

    roots
        .iter()
        .flat_map(|root| candidates.iter().map(move |c| root.join(c)))
        .find(|p| p.is_file())
}

pub fn run_remote(ctx: &mut TaskContext) -> TaskResult {
    let result = ctx.result();
    match remote(ctx) {
        Ok(()) => result.ok(),
        Err(e) => result.fail(e),
    }
}

fn remote(ctx: &TaskContext) -> ExecutionResult<()> {
    let uses = ctx.task.uses.as_str();

    let module = if is_package(uses) {
        let specifier = if uses.starts_with('@') {
            format!("jsr:{}", uses)
        } else {
            uses.to_string()
        };
        Module::Script(specifier)
    } else {
        let path = ctx
            .runtime
            .resolver
            .resolve(uses, &ctx.project.trusted_sources, &ctx.project.dir)?;
        locate(&path)?
    };

    debug!(task = %ctx.task.id, module = ?module, "running remote module");
    match module {
        Module::Manifest(path) => run_manifest(ctx, &path),
        Module::Script(specifier) => run_deno(ctx, &specifier, &ctx.task.env, &ctx.task.with),
    }
}

fn run_manifest(ctx: &TaskContext, path: &Path) -> ExecutionResult<()> {
    let manifest = TaskManifest::load(path)?;
    let inputs = manifest.input_env(&ctx.task.with)?;

    let mut env = ctx.task.env.clone();
    for (key, value) in &inputs {
        env.set(key.clone(), value.clone());
    }

    match manifest.runs.using.as_str() {
        "docker" => run_manifest_docker(ctx, &manifest, &inputs, &mut env),
        "deno" => {
            let main = manifest.runs.main.as_deref().unwrap_or("mod.ts");
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let specifier = file_specifier(&dir.join(main));
            run_deno(ctx, &specifier, &env, &Mapping::new())
        }
        "composite" => Err(ExecutionError::Remote(
            "composite remote tasks are not supported".into(),
        )),
        other => Err(ExecutionError::Remote(format!(
            "unknown execution engine '{}' in {}",
            other,
            path.display()
        ))),
    }
}

fn run_manifest_docker(
    ctx: &TaskContext,
    manifest: &TaskManifest,
    inputs: &[(String, String)],
    env: &mut Env,
) -> ExecutionResult<()> {
    let image = manifest
        .runs
        .image
        .as_deref()
        .filter(|i| !i.is_empty())
        .ok_or_else(|| {
            ExecutionError::Remote("docker module requires 'runs.image'".into())
        })?;

    let mut args: Vec<String> = vec!["run".into(), "--rm".into()];
    if !ctx.task.cwd.as_os_str().is_empty() {
        args.extend([
            "-w".to_string(),
            "/app".to_string(),
            "-v".to_string(),
            format!("{}:/app", ctx.task.cwd.display()),
        ]);
    }

    let declared = ctx.schema.env.keys().cloned();
    let input_keys = inputs.iter().map(|(k, _)| k.clone());
    for key in declared.chain(input_keys) {
        if let Some(value) = env.get(&key) {
            args.push("-e".into());
            args.push(format!("{}={}", key, value));
        }
    }

    args.push(image.to_string());
    let literal = ExpandOptions::literal();
    for arg in &manifest.runs.args {
        let expanded = env.expand(arg, &literal).map_err(|e| {
            ExecutionError::Remote(format!("failed to expand module arg '{}': {}", arg, e))
        })?;
        args.push(expanded);
    }

    let command = process::command("docker", &args, &ctx.task.cwd, env);
    process::run(command, RunOptions::default(), &ctx.cancel, &ctx.task.id)
}

fn run_deno(ctx: &TaskContext, specifier: &str, env: &Env, with: &Mapping) -> ExecutionResult<()> {
    let wrapper = write_wrapper(&ctx.task.id, &wrapper_source(specifier, with)).map_err(|e| {
        ExecutionError::Remote(format!("failed to write deno wrapper script: {}", e))
    })?;

    let mut args = vec![
        "run".to_string(),
        "-A".to_string(),
        wrapper.to_string_lossy().into_owned(),
    ];
    args.extend(ctx.all_args());

    let command = process::command("deno", &args, &ctx.task.cwd, env);
    process::run(command, RunOptions::default(), &ctx.cancel, &ctx.task.id)
}

fn write_wrapper(task_id: &str, source: &str) -> std::io::Result<tempfile::TempPath> {
    let prefix: String = task_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let mut file = tempfile::Builder::new()
        .prefix(&format!("cast_deno_{}_", prefix))
        .suffix(".ts")
        .tempfile()?;
    file.write_all(source.as_bytes())?;
    file.flush()?;
    Ok(file.into_temp_path())
}
