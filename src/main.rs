use anyhow::Result;
use clap::Parser;
use stylesearch::Opts;
use stylesearch::cli::SubCommandExtend;
use stylesearch::config::SubCommand;
use tikv_jemallocator::Jemalloc;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let opts = Opts::parse();
    match &opts.subcmd {
        SubCommand::Ingest(cmd) => cmd.run(&opts).await,
        SubCommand::Search(cmd) => cmd.run(&opts).await,
        SubCommand::Detect(cmd) => cmd.run(&opts).await,
    }
}
