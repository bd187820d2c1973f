use clap::Parser;
use habit_app::app::{run, AppConfig, Cli};

fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    let cli = Cli::parse();
    let mut config = AppConfig::from_env().unwrap_or_default();
    if let Some(dir) = cli.data_dir {
        config.set_data_dir(dir);
    }
    let mut stdout = std::io::stdout();
    if let Err(err) = run(&config, cli.command, &mut stdout) {
        eprintln!("habit_helper: {err:#}");
        std::process::exit(1);
    }
}
