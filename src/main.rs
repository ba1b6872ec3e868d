use clap::{Parser, Subcommand};
use panelvault::catalog::ListFilter;
use panelvault::library::Library;
use panelvault::scheduler::{self, Scheduler};
use panelvault::{config, output};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "panelvault")]
#[command(about = "Comic library indexer and cover thumbnailer")]
#[command(long_about = "\
Comic library indexer and cover thumbnailer

Walks a tree of .cbz/.cbr archives, keeps a SQLite catalog of directories,
comics and series in step with it, and renders one cover thumbnail per
comic into a sharded cache.

Data layout:

  <data_dir>/
  ├── panelvault.db               # Catalog
  └── cache/
      └── 0/                      # id / 512
          ├── 7-native.jpg        # Cover, verbatim
          ├── 7-300x400.jpg       # Thumbnail
          └── p7-300x400.jpg      # Post-processed variant (preferred)

  <temp_dir>/Books/<user>/<id>/   # Pages extracted for reading

Series, volume and issue are guessed from filenames:
  Batman (2011) 023.cbz           → Batman #23
  Saga v02 - Chapter Two.cbr      → Saga v2
  Hellboy 04 of 12.cbz            → Hellboy #4

Run 'panelvault gen-config' to generate a documented panelvault.toml.")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults apply when missing)
    #[arg(long, default_value = "panelvault.toml", global = true)]
    config: PathBuf,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile the library and thumbnail new comics once
    Scan {
        /// Library root (overrides library_root)
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Run cycles every scan_interval_secs until ctrl-c/SIGTERM. Type "rescan" to run one now
    Watch,
    /// List comics
    List {
        /// Only comics added in the last listing.recent_days days
        #[arg(long)]
        recent: bool,
        /// Only this series (matched ignoring case and punctuation)
        #[arg(long)]
        series: Option<String>,
        /// 1-based page
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Print the archive path of a comic
    Path { id: i64 },
    /// Print the cached thumbnail of a comic
    Thumb {
        id: i64,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
    },
    /// Extract a comic's pages into a user's reading workspace
    Extract {
        id: i64,
        #[arg(long)]
        user: String,
    },
    /// Show catalog progress and totals
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Queue every errored comic for another attempt
    ResetErrors,
    /// Re-queue comics whose thumbnail file has gone missing
    Invalidate,
    /// Print a stock panelvault.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }
    let library = Library::open(config::load_config(&cli.config)?)?;

    match cli.command {
        Command::Scan { root } => {
            let root = root.unwrap_or_else(|| library.config().library_root());
            let report = library.run_cycle_at(&root)?;
            output::print_cycle_report(&report);
        }
        Command::Watch => watch(Arc::new(library))?,
        Command::List {
            recent,
            series,
            page,
            json,
        } => {
            let filter = if recent {
                library.recent()
            } else {
                ListFilter::All
            };
            let comics = library.list_comics(filter, series.as_deref(), page)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&comics)?);
            } else {
                output::print_listing(&comics, page, library.page_count(filter)?);
            }
        }
        Command::Path { id } => {
            println!("{}", library.get_comic_path(id)?.display());
        }
        Command::Thumb { id, width, height } => {
            let t = &library.config().thumbnails;
            let (width, height) = (width.unwrap_or(t.width), height.unwrap_or(t.height));
            match library.thumbnail_path(id, width, height) {
                Some(path) => println!("{}", path.display()),
                None => {
                    let stats = library.invalidate_missing()?;
                    output::format_invalidation(stats.as_ref())
                        .iter()
                        .for_each(|line| eprintln!("{}", line));
                    return Err(format!("no {}x{} thumbnail for comic {}", width, height, id).into());
                }
            }
        }
        Command::Extract { id, user } => {
            let pages = library.extract_book(id, &user)?;
            output::print_book(&pages);
        }
        Command::Status { json } => {
            let status = scheduler::status_of(&library, None)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                output::print_status(&status, &library.stats()?);
            }
        }
        Command::ResetErrors => {
            println!("{} comics queued", library.reset_errors()?);
        }
        Command::Invalidate => {
            let stats = library.invalidate_missing()?;
            for line in output::format_invalidation(stats.as_ref()) {
                println!("{}", line);
            }
        }
        Command::GenConfig => {}
    }

    Ok(())
}

/// Log to stderr. `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "panelvault=debug"
    } else {
        "panelvault=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Run the scheduler until ctrl-c or SIGTERM. Lines on stdin are console
/// commands; stdin closing leaves the scheduler running.
fn watch(library: Arc<Library>) -> Result<(), Box<dyn std::error::Error>> {
    let scheduler = Scheduler::start(library)?;

    let (sender, commands) = tokio::sync::mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if sender.send(line).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        })?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(scheduler.serve(
        commands,
        scheduler::shutdown_signal(),
        |text| println!("{}", text),
    ))?;

    tracing::info!("shutting down");
    scheduler.shutdown();
    Ok(())
}
