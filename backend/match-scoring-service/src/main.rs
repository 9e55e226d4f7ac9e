use anyhow::{anyhow, bail, Context, Result};
use match_scoring_service::{
    db::{PgRepository, RedisResultStore},
    logging, metrics,
    models::{BatchMode, BatchStatus},
    services::EngineSettings,
    BatchOrchestrator, Config, Repositories, ScoringEngine,
};
use std::env;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

const USAGE: &str = "Usage:
  match-scoring-service score <user_id> <job_id>
  match-scoring-service rank <user_id>
  match-scoring-service batch-user <user_id> [--jobs <id,id,...>] [--weights-version <n>]
  match-scoring-service batch [--users <id,id,...>] [--candidates <n>] [--weights-version <n>]";

enum Command {
    Score { user_id: Uuid, job_id: Uuid },
    Rank { user_id: Uuid },
    Batch { mode: BatchMode, weights_version: Option<u32> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    logging::init_tracing(&config.service.log_format);

    let command = match parse_args(env::args().skip(1).collect()) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    info!(
        service = %config.service.service_name,
        weights = %config.service.weights_name,
        "Starting match scoring service"
    );

    let pg = PgRepository::connect(&config.database)
        .await
        .context("failed to connect to PostgreSQL")?;
    let results = RedisResultStore::new(&config.redis)
        .await
        .context("failed to connect to Redis")?;
    let repos = Repositories::from_parts(Arc::new(pg), Arc::new(results));

    let engine = Arc::new(
        ScoringEngine::new(repos, EngineSettings::from_config(&config))
            .await
            .context("failed to initialize scoring engine")?,
    );

    match command {
        Command::Score { user_id, job_id } => {
            let result = engine.compute_score(user_id, job_id).await?;
            println!("{}", serde_json::to_string_pretty(&*result)?);
        }
        Command::Rank { user_id } => {
            let entries = engine.get_ranked_sections(user_id).await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Command::Batch {
            mode,
            weights_version,
        } => {
            let orchestrator = Arc::new(BatchOrchestrator::new(engine, config.batch.clone()));
            let run_id = orchestrator.start_batch(mode, weights_version).await?;

            let report = tokio::select! {
                report = orchestrator.wait_for_completion(run_id) => report?,
                _ = tokio::signal::ctrl_c() => {
                    info!(%run_id, "Interrupted, cancelling batch run");
                    orchestrator.cancel_batch(run_id).await?;
                    orchestrator.wait_for_completion(run_id).await?
                }
            };

            println!("{}", serde_json::to_string_pretty(&report)?);
            if let Ok(text) = metrics::render() {
                tracing::debug!(metrics = %text, "Batch metrics");
            }
            if report.status == BatchStatus::Failed {
                error!(%run_id, "Batch run failed");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn parse_args(args: Vec<String>) -> Result<Command> {
    let mut it = args.into_iter();
    let command = it.next().ok_or_else(|| anyhow!("missing command"))?;

    match command.as_str() {
        "score" => {
            let user_id = parse_uuid(it.next(), "user_id")?;
            let job_id = parse_uuid(it.next(), "job_id")?;
            Ok(Command::Score { user_id, job_id })
        }
        "rank" => Ok(Command::Rank {
            user_id: parse_uuid(it.next(), "user_id")?,
        }),
        "batch-user" => {
            let user_id = parse_uuid(it.next(), "user_id")?;
            let mut job_ids = None;
            let mut weights_version = None;
            while let Some(flag) = it.next() {
                match flag.as_str() {
                    "--jobs" => job_ids = Some(parse_uuid_list(it.next(), "--jobs")?),
                    "--weights-version" => {
                        weights_version = Some(parse_number(it.next(), "--weights-version")?)
                    }
                    other => bail!("unknown flag {}", other),
                }
            }
            Ok(Command::Batch {
                mode: BatchMode::SingleUser { user_id, job_ids },
                weights_version,
            })
        }
        "batch" => {
            let mut user_ids = None;
            let mut candidates_per_user = None;
            let mut weights_version = None;
            while let Some(flag) = it.next() {
                match flag.as_str() {
                    "--users" => user_ids = Some(parse_uuid_list(it.next(), "--users")?),
                    "--candidates" => {
                        candidates_per_user = Some(parse_number(it.next(), "--candidates")?)
                    }
                    "--weights-version" => {
                        weights_version = Some(parse_number(it.next(), "--weights-version")?)
                    }
                    other => bail!("unknown flag {}", other),
                }
            }
            Ok(Command::Batch {
                mode: BatchMode::BulkMultiUser {
                    user_ids,
                    candidates_per_user,
                },
                weights_version,
            })
        }
        other => bail!("unknown command {}", other),
    }
}

fn parse_uuid(value: Option<String>, name: &str) -> Result<Uuid> {
    let value = value.ok_or_else(|| anyhow!("{} is required", name))?;
    Uuid::parse_str(&value).with_context(|| format!("invalid {}", name))
}

fn parse_uuid_list(value: Option<String>, flag: &str) -> Result<Vec<Uuid>> {
    let value = value.ok_or_else(|| anyhow!("{} requires a comma separated list", flag))?;
    value
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| Uuid::parse_str(s.trim()).with_context(|| format!("invalid id in {}", flag)))
        .collect()
}

fn parse_number<T>(value: Option<String>, flag: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = value.ok_or_else(|| anyhow!("{} requires a number", flag))?;
    value
        .parse()
        .with_context(|| format!("invalid {}", flag))
}
