mod backup;
mod cli;
mod commands;
mod env_loader;
mod error;
mod logging;
mod storage;

fn main() {
    env_loader::load_dotenv();

    if let Err(err) = cli::run() {
        tracing::error!("{err:#}");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
