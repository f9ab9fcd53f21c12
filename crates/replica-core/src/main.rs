use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use replica_core::logging;
use replica_core::prelude::*;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

fn data_arg() -> Arg {
    Arg::new("data")
        .long("data")
        .required(true)
        .num_args(1..)
        .action(ArgAction::Append)
        .value_parser(value_parser!(PathBuf))
        .help("Dataset JSON files: {\"name\": .., \"observations\": [{\"time\": .., \"values\": [..]}]}")
}

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .value_parser(value_parser!(PathBuf))
        .help("TOML configuration file")
}

fn cli() -> Command {
    Command::new("replica")
        .version(replica_core::VERSION)
        .about("Reproducible replicate likelihood evaluation")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .global(true)
                .help("Increase log verbosity"),
        )
        .subcommand(
            Command::new("evaluate")
                .about("Evaluate the random-walk model against replicate datasets")
                .arg(data_arg())
                .arg(config_arg())
                .arg(
                    Arg::new("param")
                        .long("param")
                        .action(ArgAction::Append)
                        .value_parser(parse_param)
                        .help("Model parameter as name=value (drift, sigma, x0)"),
                )
                .arg(
                    Arg::new("likelihood")
                        .long("likelihood")
                        .default_value("direct")
                        .value_parser(["direct", "ensemble"])
                        .help("Likelihood estimator"),
                )
                .arg(
                    Arg::new("error")
                        .long("error")
                        .default_value("1.0")
                        .help("Observation error: a fixed value or a parameter name"),
                )
                .arg(
                    Arg::new("members")
                        .long("members")
                        .default_value("16")
                        .value_parser(value_parser!(usize))
                        .help("Ensemble members (minimum when adaptive)"),
                )
                .arg(
                    Arg::new("max-members")
                        .long("max-members")
                        .value_parser(value_parser!(usize))
                        .help("Maximum ensemble members; enables adaptive sizing"),
                )
                .arg(
                    Arg::new("rounds")
                        .long("rounds")
                        .default_value("1")
                        .value_parser(value_parser!(u32))
                        .help("Number of evaluation rounds"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                )
                .arg(
                    Arg::new("json-logs")
                        .long("json-logs")
                        .action(ArgAction::SetTrue)
                        .help("Emit logs as JSON"),
                ),
        )
        .subcommand(
            Command::new("plan")
                .about("Print the dispatch plan without evaluating")
                .arg(data_arg())
                .arg(config_arg())
                .arg(
                    Arg::new("likelihood")
                        .long("likelihood")
                        .default_value("direct")
                        .value_parser(["direct", "ensemble"])
                        .help("Likelihood estimator"),
                )
                .arg(
                    Arg::new("members")
                        .long("members")
                        .default_value("16")
                        .value_parser(value_parser!(usize))
                        .help("Ensemble members"),
                ),
        )
}

fn parse_param(raw: &str) -> Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value for '{name}': {e}"))?;
    Ok((name.trim().to_string(), value))
}

fn load_config(args: &ArgMatches) -> anyhow::Result<ReplicateConfig> {
    match args.get_one::<PathBuf>("config") {
        Some(path) => ReplicateConfig::from_path(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(ReplicateConfig::default()),
    }
}

fn load_datasets(args: &ArgMatches) -> anyhow::Result<Vec<Dataset>> {
    let mut datasets = Vec::new();
    for path in args.get_many::<PathBuf>("data").into_iter().flatten() {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading dataset {}", path.display()))?;
        let raw: Dataset = serde_json::from_str(&text)
            .with_context(|| format!("parsing dataset {}", path.display()))?;
        datasets.push(Dataset::new(raw.name, raw.observations));
    }
    Ok(datasets)
}

fn likelihood(args: &ArgMatches) -> Arc<dyn Likelihood> {
    let error = match args.try_get_one::<String>("error").ok().flatten() {
        Some(raw) => match raw.parse::<f64>() {
            Ok(value) => ErrorScale::Fixed(value),
            Err(_) => ErrorScale::Parameter(raw.clone()),
        },
        None => ErrorScale::default(),
    };
    let members = args.get_one::<usize>("members").copied().unwrap_or(16);
    if args.get_one::<String>("likelihood").map(String::as_str) == Some("ensemble") {
        let max = args
            .try_get_one::<usize>("max-members")
            .ok()
            .flatten()
            .copied()
            .unwrap_or(members);
        return Arc::new(EnsembleLikelihood::new(error, members).with_range(members, max));
    }
    Arc::new(DirectLikelihood::new(error))
}

fn orchestrator(args: &ArgMatches, verbosity: u8) -> anyhow::Result<ReplicateOrchestrator> {
    let mut config = load_config(args)?;
    config.verbosity = config.verbosity.max(verbosity);
    let mut replicates =
        ReplicateOrchestrator::new(config, likelihood(args), |_| Box::new(RandomWalk::new()))?;
    for dataset in load_datasets(args)? {
        replicates.add_dataset(dataset, None)?;
    }
    Ok(replicates)
}

fn run() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("evaluate", args)) => {
            let verbosity = args.get_count("verbose");
            logging::init(verbosity, args.get_flag("json-logs"));
            let mut replicates = orchestrator(args, verbosity)?;
            let params: Parameters = args
                .get_many::<(String, f64)>("param")
                .into_iter()
                .flatten()
                .cloned()
                .collect();
            let rounds = args.get_one::<u32>("rounds").copied().unwrap_or(1);
            let json = args.get_flag("json");

            let mut all_successful = true;
            for round in 1..=rounds {
                let result = replicates.evaluate(&params)?;
                all_successful &= result.successful;
                if json {
                    println!("{}", result.to_json()?);
                    continue;
                }
                println!(
                    "Round {}: value={} successful={}",
                    round, result.value, result.successful
                );
                for (name, value) in &result.evaluations {
                    let feedback = result.feedbacks.get(name).copied().unwrap_or(f64::NAN);
                    println!("  {name}: {value} (feedback {feedback})");
                }
                if !result.substituted.is_empty() {
                    println!("  substituted: {}", result.substituted.join(", "));
                }
                println!(
                    "  executor: {} tasks on {} workers in {:.1}ms",
                    result.executor.tasks, result.executor.workers, result.executor.wall_ms
                );
            }
            if !all_successful {
                bail!("every replicate failed in at least one round");
            }
        }
        Some(("plan", args)) => {
            let verbosity = args.get_count("verbose");
            logging::init(verbosity, false);
            let mut replicates = orchestrator(args, verbosity)?;
            println!("{:<4} {:<24} {:>10} {:>6} sandbox", "pos", "name", "cost", "seed");
            for (position, entry) in replicates.plan()?.iter().enumerate() {
                println!(
                    "{:<4} {:<24} {:>10} {:>6} {}",
                    position, entry.name, entry.cost, entry.seed_index, entry.sandbox_label
                );
            }
        }
        _ => bail!("no subcommand given"),
    }
    Ok(())
}

/// Process exit status: 2 for caller mistakes, 1 for everything else
fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ReplicaError>() {
        Some(e) if e.is_usage_error() => 2,
        _ => 1,
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_status(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn usage_errors_exit_with_two() {
        let usage = anyhow::Error::from(ReplicaError::DuplicateDataset("A".into()))
            .context("registering datasets");
        assert_eq!(exit_status(&usage), 2);

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(exit_status(&anyhow::Error::from(ReplicaError::from(io))), 1);
        assert_eq!(exit_status(&anyhow::anyhow!("every replicate failed")), 1);
    }

    #[test]
    fn params_parse() {
        assert_eq!(parse_param("drift=0.5").unwrap(), ("drift".to_string(), 0.5));
        assert!(parse_param("drift").is_err());
        assert!(parse_param("drift=abc").is_err());
    }
}
