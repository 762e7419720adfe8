use std::process;

fn main() {
    match cast::cli::run() {
        Ok(code) => process::exit(code),
        Err(e) => {
            if let Some(clap_err) = e.downcast_ref::<clap::Error>() {
                clap_err.exit();
            }
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}
