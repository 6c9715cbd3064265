use clap::Parser;
use tracing::Level;
use ze_loader::{
    ddi::{ze, zes, DdiCategory},
    registry::{StatusKind, Subsystem},
    ApiVersion, LoaderConfig, LoaderContext,
};

#[derive(clap::Parser, Clone, Debug)]
#[command(about = "Show the drivers and tables the loader would hand out")]
struct Cli {
    /// Log loader diagnostics at debug level.
    #[arg(short, long)]
    verbose: bool,
    /// API version to resolve tables at, as MAJOR.MINOR.
    #[arg(long, value_parser = parse_version)]
    api: Option<ApiVersion>,
    /// Only list drivers; do not resolve any tables.
    #[arg(long)]
    drivers_only: bool,
}

fn parse_version(s: &str) -> Result<ApiVersion, String> {
    let (major, minor) = s
        .split_once('.')
        .ok_or_else(|| format!("expected MAJOR.MINOR, got '{}'", s))?;
    let major = major.parse::<u16>().map_err(|e| e.to_string())?;
    let minor = minor.parse::<u16>().map_err(|e| e.to_string())?;
    Ok(ApiVersion::new(major, minor))
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .without_time()
            .with_max_level(level)
            .finish(),
    )
    .map_err(|e| miette::miette!("failed to install subscriber: {}", e))?;

    let ctx = LoaderContext::init(LoaderConfig::from_env());
    print_drivers(&ctx);
    for component in ctx.components() {
        println!("component: {}", component);
    }

    if !cli.drivers_only {
        let version = cli.api.unwrap_or(ctx.version());
        println!("tables at API {}:", version);
        macro_rules! show {
            ($cat:path) => {
                show_table::<$cat>(&ctx, version)?;
            };
        }
        show!(ze::ZeGlobal);
        show!(ze::ZeDriver);
        show!(ze::ZeDevice);
        show!(zes::ZesGlobal);
        show!(zes::ZesDriver);
        show!(zes::ZesDevice);
        show!(zes::ZesPower);
        show!(zes::ZesEngine);
        show!(zes::ZesMemory);
        show!(zes::ZesFrequency);
        show!(zes::ZesFabricPort);
        show!(zes::ZesRasExp);
    }

    for lib in ctx.shutdown() {
        tracing::debug!("released {}", lib);
    }
    Ok(())
}

fn print_drivers(ctx: &LoaderContext) {
    for subsystem in [Subsystem::Core, Subsystem::Sysman] {
        let drivers = ctx.sorted(subsystem);
        println!("{} drivers ({}):", subsystem, drivers.len());
        for (idx, drv) in drivers.iter().enumerate() {
            println!(
                "  [{}] {:<28} {:<14} init={} sysman={} usable={}",
                idx,
                drv.name(),
                drv.driver_type().to_string(),
                drv.status(StatusKind::Init),
                drv.status(StatusKind::Sysman),
                drv.is_usable(subsystem)
            );
        }
    }
}

// A category that fails to resolve is reported, not fatal; only a broken context is.
fn show_table<C: DdiCategory>(ctx: &LoaderContext, version: ApiVersion) -> miette::Result<()> {
    let mut table = C::Table::default();
    match ctx.get_proc_addr_table::<C>(version, Some(&mut table)) {
        Ok(()) => {
            let entries = C::entries(&table);
            let filled = entries.iter().flatten().count();
            println!("  {:<32} {}/{} entries", C::SYMBOL, filled, entries.len());
        }
        Err(e) if ctx.registry().all().is_empty() => {
            return Err(miette::Report::new(e).wrap_err("no drivers were discovered"));
        }
        Err(e) => {
            println!("  {:<32} {}", C::SYMBOL, e.code());
            tracing::debug!("{:?}", miette::Report::new(e));
        }
    }
    Ok(())
}
