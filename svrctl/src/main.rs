use clap::Parser;

fn main() {
    let cli = svrctl::Cli::parse();
    if let Err(err) = svrctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
