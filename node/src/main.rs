use std::path::PathBuf;
use std::time::Duration;

use structopt::StructOpt;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(StructOpt)]
#[structopt(name = "replication-node")]
struct Opt {
    /// Unique node ID
    #[structopt(short = "i", long = "id")]
    id: u64,

    /// Total number of nodes
    #[structopt(short = "c", long = "count")]
    count: usize,

    /// Port of node 0; node `i` listens on `port + i`
    #[structopt(short = "p", long = "port", default_value = "20000")]
    port: u16,

    /// Directory for stable storage
    #[structopt(short = "d", long = "data-dir", parse(from_os_str), default_value = ".")]
    data_dir: PathBuf,

    /// Timeout for log proposer rounds (in milliseconds)
    #[structopt(short = "t", long = "timeout", default_value = "3000")]
    timeout: u64,

    /// Try to become lease owner at startup instead of on first append
    #[structopt(short = "l", long = "lease")]
    lease: bool,

    /// Log verbosity, repeat for more
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: u8,
}

fn setup_logging(verbose: u8) -> Result<(), fern::InitError> {
    let level = match verbose {
    | 0 => log::LevelFilter::Warn,
    | 1 => log::LevelFilter::Info,
    | 2 => log::LevelFilter::Debug,
    | _ => log::LevelFilter::Trace,
    };
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{}][{}] {}", record.level(), record.target(), message))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}

#[tokio::main]
async fn main() -> replication::Result<()> {
    let opt = Opt::from_args();

    if let Err(error) = setup_logging(opt.verbose) {
        eprintln!("failed to initialize logging: {}", error);
    }

    std::fs::create_dir_all(&opt.data_dir)?;
    let config = replication::Config::new(opt.id, opt.count)
        .with_base_port(opt.port)
        .with_data_dir(&opt.data_dir)
        .with_paxos_timeout(Duration::from_millis(opt.timeout));

    let storage = replication::FileStorage::open(config.storage_path())?;
    let mut handle = replication::net::spawn(config, storage).await?;
    if opt.lease {
        handle.acquire_lease()?;
    }

    // Each line of standard input is appended; chosen values are printed in order
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
            | Some(line) => {
                if let Err(error) = handle.append(line.into_bytes()).await {
                    eprintln!("append failed: {}", error);
                }
            }
            | None => return Ok(()),
            },
            chosen = handle.next_chosen() => match chosen {
            | Some(chosen) => println!("{}: {}", chosen.paxos_id, String::from_utf8_lossy(&chosen.value)),
            | None => return Ok(()),
            },
        }
    }
}
