use anyhow::{bail, Context};
use clap::{ArgAction, Args, Parser, Subcommand};
use colored::*;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use argus::{
    catalog,
    config::Settings,
    device::Device,
    dns::SystemResolver,
    scanner::ScanCoordinator,
    store::{
        query::{self, Field, DEFAULT_INACTIVE_SECS},
        RecordStore,
    },
};

#[derive(Parser, Debug)]
#[command(name = "argus", version, about = "Argus: SNMP discovery and inventory for network devices")]
struct Cli {
    /// Settings file (default: ./argus.toml, then ~/.argus.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll every configured target and update the store
    Update {
        /// Check reverse and forward domain names of responding devices
        #[arg(long)]
        dns: bool,

        /// Override the number of worker threads
        #[arg(short, long)]
        threads: Option<usize>,

        /// Override the SNMP community
        #[arg(long)]
        community: Option<String>,
    },
    /// Show stored records
    Show(ShowArgs),
    /// Search stored records
    Find(FindArgs),
    /// Remove one record from the store
    Delete {
        address: IpAddr,
    },
}

#[derive(Args, Debug)]
struct ShowArgs {
    /// Every record
    #[arg(long, conflicts_with_all = ["device", "inactive", "uplinks"])]
    all: bool,

    /// One device, by address or domain name
    #[arg(long, value_name = "ADDR|NAME")]
    device: Option<String>,

    /// Uplink chain from one device upward, by address or domain name
    #[arg(short = 'u', long, value_name = "ADDR|NAME")]
    uplinks: Option<String>,

    /// Devices that did not answer during the latest runs
    #[arg(long)]
    inactive: bool,

    /// Inactivity threshold in seconds
    #[arg(long, default_value_t = DEFAULT_INACTIVE_SECS, requires = "inactive")]
    threshold: i64,
}

#[derive(Args, Debug)]
struct FindArgs {
    /// Devices carrying this VLAN
    #[arg(long)]
    vlan: Option<String>,

    /// Substring to look for
    #[arg(long)]
    text: Option<String>,

    /// Field searched with --text (ip, dname, contact, location, model, firmware, any)
    #[arg(long, default_value = "any", requires = "text")]
    field: Field,

    /// Devices running older firmware than the newest seen for their model
    #[arg(long)]
    outdated: bool,

    /// Newest firmware per model
    #[arg(long)]
    newest_firmware: bool,

    /// Devices of MODEL running firmware older than VERSION
    #[arg(long, num_args = 2, value_names = ["MODEL", "VERSION"], conflicts_with = "newer_software")]
    older_software: Option<Vec<String>>,

    /// Devices of MODEL running firmware newer than VERSION
    #[arg(long, num_args = 2, value_names = ["MODEL", "VERSION"])]
    newer_software: Option<Vec<String>>,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp_secs()
        .init();
}

fn load_settings(path: Option<&PathBuf>) -> anyhow::Result<Settings> {
    let settings = match path {
        Some(path) => Settings::from_toml_file(path)?,
        None => Settings::load_default()?,
    };
    settings.validate()?;
    Ok(settings)
}

fn open_store(settings: &Settings) -> anyhow::Result<RecordStore> {
    RecordStore::open(&settings.store.path, &settings.store.tree)
        .with_context(|| format!("cannot open store {}", settings.store.path.display()))
}

fn update(settings: Settings, dns: bool) -> anyhow::Result<()> {
    let catalog = catalog::load_dir(&settings.cards_dir)?;
    println!(
        "{} {} device cards loaded from {}",
        "[~]".bright_blue(),
        catalog.len().to_string().bright_cyan().bold(),
        settings.cards_dir.display()
    );

    let groups = settings.views()?;
    if groups.is_empty() {
        bail!("no subnets or hosts configured");
    }

    let mut coordinator = ScanCoordinator::new(open_store(&settings)?, catalog);
    if dns {
        coordinator = coordinator.with_name_resolver(Arc::new(SystemResolver));
    }

    let report = coordinator.run(groups)?;
    println!("{} {}", "[✓]".bright_green(), report.to_string().bright_white().bold());
    Ok(())
}

fn print_devices<'a, I>(devices: I)
where
    I: IntoIterator<Item = &'a Device>,
{
    let mut count = 0;
    for device in devices {
        println!("{}", device);
        count += 1;
    }
    println!("{} {} record(s)", "[~]".bright_blue(), count.to_string().bright_cyan());
}

fn show(settings: &Settings, args: &ShowArgs) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let records = store.records()?;

    if let Some(query) = &args.device {
        match query::find_device(&records, query) {
            Some(device) => println!("{}", device),
            None => bail!("no record for {}", query),
        }
    } else if let Some(start) = &args.uplinks {
        let chain = query::uplink_chain(&records, start);
        if chain.is_empty() {
            bail!("no record for {}", start);
        }
        for device in chain {
            let location = device.location.as_deref().unwrap_or("-");
            println!("{} {}", device.address.to_string().bright_cyan(), location);
        }
    } else if args.inactive {
        let reference = store.last_transaction_time()?.unwrap_or_else(chrono::Utc::now);
        let threshold = chrono::Duration::seconds(args.threshold);
        print_devices(query::inactive(&records, reference, threshold));
    } else {
        print_devices(&records);
    }
    Ok(())
}

fn find(settings: &Settings, args: &FindArgs) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let records = store.records()?;

    if args.newest_firmware {
        for (model, firmware) in query::newest_firmware(&records) {
            println!("{:<32} {}", model.bright_white().bold(), firmware);
        }
    } else if let Some((software, older)) = args
        .older_software
        .as_ref()
        .map(|s| (s, true))
        .or_else(|| args.newer_software.as_ref().map(|s| (s, false)))
    {
        let [model, version] = software.as_slice() else {
            bail!("expected MODEL and VERSION");
        };
        print_devices(query::software_search(&records, model, version, older));
    } else if args.outdated {
        print_devices(query::outdated(&records));
    } else if let Some(vlan) = &args.vlan {
        print_devices(query::search(&records, Field::Vlans, vlan));
    } else if let Some(text) = &args.text {
        print_devices(query::search(&records, args.field, text));
    } else {
        bail!("nothing to find: use --vlan, --text, --outdated, --newest-firmware, --older-software or --newer-software");
    }
    Ok(())
}

fn delete(settings: &Settings, address: IpAddr) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let mut session = store.session()?;
    if session.get(&address)?.is_none() {
        bail!("no record for {}", address);
    }
    session.delete(&address);
    session.commit()?;
    session.close();
    println!("{} {} removed", "[✓]".bright_green(), address.to_string().bright_cyan());
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut settings = load_settings(cli.config.as_ref())?;

    match cli.command {
        Command::Update { dns, threads, community } => {
            if let Some(threads) = threads {
                settings = settings.with_threads(threads);
            }
            if let Some(community) = community {
                settings = settings.with_community(community);
            }
            settings.validate()?;
            update(settings, dns)
        }
        Command::Show(args) => show(&settings, &args),
        Command::Find(args) => find(&settings, &args),
        Command::Delete { address } => delete(&settings, address),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if cli.no_color {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "[!] ERROR:".bright_red(), e);
        process::exit(1);
    }
}
