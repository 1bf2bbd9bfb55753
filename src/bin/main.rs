use clap::Parser;

use endcount::commands::Commands;

#[derive(Parser)]
#[command(
    name = "endcount",
    author,
    version,
    about = "Discover transcript 3' ends from paired-end alignments and \
             count reads per sample at those ends"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.command.run()
}
