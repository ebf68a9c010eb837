use clap::Parser;
use tcp_sweep_cli::{Args, run};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    run(args)
}
