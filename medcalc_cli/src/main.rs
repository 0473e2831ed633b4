use clap::{Parser, Subcommand};
use medcalc_core::*;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "medcalc")]
#[command(about = "Medical calculator plugin runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Read configuration from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output locale (zh-TW, en, ja)
    #[arg(long, global = true)]
    locale: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered calculators
    List,

    /// Print a calculator's configuration as JSON
    Describe {
        /// Plugin id, e.g. general.bmi
        id: String,
    },

    /// Validate inputs without calculating
    Validate {
        id: String,

        /// Inputs as a JSON object
        #[arg(long)]
        inputs: String,
    },

    /// Validate and calculate
    Calc {
        id: String,

        /// Inputs as a JSON object
        #[arg(long)]
        inputs: String,

        /// Print the raw result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Evaluate every row of a CSV file
    Batch {
        id: String,

        /// CSV file with one input set per row
        #[arg(long)]
        input: PathBuf,
    },

    /// Load every calculator and print cache and load statistics
    Stats,
}

fn main() {
    medcalc_core::logging::init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let locale = match &cli.locale {
        Some(l) => l.parse::<Locale>()?,
        None => config.runtime.default_locale,
    };
    tracing::debug!("Using locale {}", locale);
    let service = CalculatorService::new(ModuleRegistry::with_builtins(), &config);

    match cli.command {
        Commands::List => cmd_list(&service, locale),
        Commands::Describe { id } => cmd_describe(&service, &PluginId::from(id)),
        Commands::Validate { id, inputs } => {
            cmd_validate(&service, &PluginId::from(id), &inputs)
        }
        Commands::Calc { id, inputs, json } => {
            cmd_calc(&service, &PluginId::from(id), &inputs, json, locale)
        }
        Commands::Batch { id, input } => cmd_batch(&service, &PluginId::from(id), &input),
        Commands::Stats => cmd_stats(&service),
    }
}

fn parse_inputs(raw: &str) -> Result<Inputs> {
    Ok(serde_json::from_str(raw)?)
}

fn cmd_list(service: &CalculatorService, locale: Locale) -> Result<()> {
    for id in service.available_plugins() {
        match service.registry().resolve(&id) {
            Ok(module) => println!(
                "{:<32} {:<8} {}",
                id,
                module.metadata.version,
                module.config.name.resolve(locale)
            ),
            Err(e) => println!("{:<32} {:<8} ({})", id, "-", e),
        }
    }
    Ok(())
}

fn cmd_describe(service: &CalculatorService, id: &PluginId) -> Result<()> {
    let module = service.load_calculator(id)?;
    println!("{}", serde_json::to_string_pretty(&module.config)?);
    Ok(())
}

fn cmd_validate(service: &CalculatorService, id: &PluginId, raw: &str) -> Result<()> {
    let inputs = parse_inputs(raw)?;
    let validation = service.validate(id, &inputs)?;
    println!("{}", serde_json::to_string_pretty(&validation)?);

    if !validation.is_valid {
        std::process::exit(2);
    }
    Ok(())
}

fn cmd_calc(
    service: &CalculatorService,
    id: &PluginId,
    raw: &str,
    json: bool,
    locale: Locale,
) -> Result<()> {
    let inputs = parse_inputs(raw)?;
    let result = match service.calculate(id, &inputs) {
        Ok(result) => result,
        Err(Error::CalculationPrecondition { errors, .. }) => {
            eprintln!("Invalid inputs:");
            for e in &errors.errors {
                eprintln!("  - {} [{}]: {}", e.field, e.code, e.message);
            }
            std::process::exit(2);
        }
        Err(e) => return Err(e),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let formatted = service.format_result_with(id, &result, locale)?;
    println!("{}", formatted.display_value);
    println!("{}", formatted.description);
    for recommendation in &formatted.recommendations {
        println!("  • {}", recommendation);
    }
    Ok(())
}

fn cmd_batch(service: &CalculatorService, id: &PluginId, input: &Path) -> Result<()> {
    let file = File::open(input)?;
    let summary = run_batch(service, id, BufReader::new(file), io::stdout().lock())?;
    eprintln!(
        "{} rows: {} calculated, {} rejected",
        summary.rows, summary.calculated, summary.rejected
    );
    Ok(())
}

fn cmd_stats(service: &CalculatorService) -> Result<()> {
    let ids = service.available_plugins();
    for _ in 0..2 {
        for id in &ids {
            if let Err(e) = service.load_calculator(id) {
                eprintln!("Failed to load {}: {}", id, e);
            }
        }
    }

    let stats = service.get_stats();
    println!("Cache");
    println!("  entries:   {}", stats.cache.total_entries);
    println!("  hits:      {}", stats.cache.hits);
    println!("  misses:    {}", stats.cache.misses);
    println!("  hit rate:  {:.0}%", stats.cache.hit_rate * 100.0);
    println!("  memory:    {} bytes", stats.cache.memory_estimate);
    println!("Loads");
    println!("  modules:   {}", stats.loads.total_modules);
    println!("  loads:     {}", stats.loads.total_loads);
    println!("  average:   {:.3}ms", stats.loads.average_load_time_ms);

    if stats.issues.is_empty() {
        println!("No performance issues");
    } else {
        println!("Performance issues:");
        for issue in &stats.issues {
            println!("  ! {}", issue);
        }
    }
    Ok(())
}
