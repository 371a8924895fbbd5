use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = lingestctl::Cli::parse();
    lingestctl::init_logging();
    if let Err(err) = lingestctl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
