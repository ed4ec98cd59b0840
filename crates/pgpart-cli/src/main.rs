//! Command-line driver for online table partitioning migrations.
//!
//! Each subcommand maps to one engine operation; a full migration is the
//! sequence `partition-table`, `backfill` (repeated by the scheduler),
//! `finalize`, `replace-table`, and eventually `drop-archive`.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use pgpart_core::{
    Backfill, BackfillConfig, BackfillOutcome, BackfillRange, Cutover, FkAction,
    ForeignKeyHelpers, IndexHelpers, LockRetries, Outcome, TableManager, TokioPacer,
    UniquenessHelpers,
};
use pgpart_pg::{PgCatalog, PgExecutor, PgJobLedger};

/// Online table partitioning for PostgreSQL
#[derive(Parser, Debug)]
#[command(name = "pgpart")]
#[command(version, about = "Online table partitioning for PostgreSQL")]
struct Args {
    /// Database connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the partitioned sibling of a table with monthly partitions
    PartitionTable {
        table: String,
        /// Timestamp column to partition by
        column: String,
        /// Inclusive start of the partitioned month range (YYYY-MM-DD)
        #[arg(long)]
        min_date: NaiveDate,
        /// End of the partitioned month range (YYYY-MM-DD)
        #[arg(long)]
        max_date: NaiveDate,
    },
    /// Drop the partitioned sibling and the sync trigger
    DropPartitionedTable { table: String },
    /// Copy one id range from a table into its partitioned sibling
    Backfill {
        source: String,
        start_id: i64,
        stop_id: i64,
        /// Destination table; defaults to `<source>_part`
        #[arg(long)]
        destination: Option<String>,
        /// Id column the range is expressed over
        #[arg(long, default_value = "id")]
        column: String,
        /// Rows copied per sub-batch
        #[arg(long, default_value_t = 2_500)]
        sub_batch_size: usize,
        /// Pause between sub-batches, in milliseconds
        #[arg(long, default_value_t = 250)]
        pause_ms: u64,
    },
    /// Re-run pending backfill ranges inline, then vacuum the sibling
    Finalize { table: String },
    /// Swap the partitioned sibling into the table's place
    ReplaceTable { table: String },
    /// Undo a table replacement
    RollbackReplace { table: String },
    /// Drop the archived original after a permanent cutover
    DropArchive { table: String },
    /// Concurrently build an index across a partitioned table
    AddIndex {
        table: String,
        name: String,
        #[arg(required = true)]
        columns: Vec<String>,
    },
    /// Remove a partitioned index by name
    RemoveIndex { table: String, name: String },
    /// List groups of structurally identical indexes on a table
    FindDuplicateIndexes { table: String },
    /// Add a foreign key across a partitioned table without blocking
    AddForeignKey {
        source: String,
        column: String,
        target: String,
        /// ON DELETE action: no-action, restrict, cascade, set-null
        #[arg(long, default_value = "no-action")]
        on_delete: String,
        /// Constraint name; defaults to a hash of table and column
        #[arg(long)]
        name: Option<String>,
        /// Leave partition constraints unvalidated and skip the parent attach
        #[arg(long)]
        no_validate: bool,
    },
    /// Validate a previously added foreign key on every partition
    ValidateForeignKey {
        source: String,
        column: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Force sequence-assigned ids on a table
    EnsureUniqueId {
        table: String,
        /// Sequence to assign from; defaults to `<table>_id_seq`
        #[arg(long)]
        sequence: Option<String>,
    },
    /// Undo ensure-unique-id
    RevertUniqueId {
        table: String,
        /// Sequence to restore as the column default; defaults to `<table>_id_seq`
        #[arg(long)]
        sequence: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pgpart_core=info".parse().unwrap())
                .add_directive("pgpart_cli=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let client = pgpart_pg::connect(&args.database_url).await?;
    let catalog = Arc::new(PgCatalog::new(client.clone()));
    let executor = Arc::new(PgExecutor::new(client.clone()));
    let ledger = Arc::new(PgJobLedger::new(client));
    let pacer = Arc::new(TokioPacer);
    let retry = LockRetries::new(executor.clone(), pacer.clone());

    match args.command {
        Command::PartitionTable {
            table,
            column,
            min_date,
            max_date,
        } => {
            let manager = TableManager::new(catalog, executor, retry);
            report(
                manager
                    .partition_table_by_date(&table, &column, min_date, max_date)
                    .await?,
            );
        }
        Command::DropPartitionedTable { table } => {
            let manager = TableManager::new(catalog, executor, retry);
            manager.drop_partitioned_table_for(&table).await?;
        }
        Command::Backfill {
            source,
            start_id,
            stop_id,
            destination,
            column,
            sub_batch_size,
            pause_ms,
        } => {
            let destination =
                destination.unwrap_or_else(|| pgpart_core::naming::partitioned_table_name(&source));
            let config = BackfillConfig {
                sub_batch_size,
                pause: Duration::from_millis(pause_ms),
            };
            let backfill = Backfill::new(catalog, executor, ledger, pacer, config);
            let range = BackfillRange::new(start_id, stop_id, source, destination, column);
            match backfill.perform(&range).await? {
                BackfillOutcome::Completed { sub_batches, .. } => {
                    println!("backfilled range in {} sub-batches", sub_batches);
                }
                BackfillOutcome::Skipped(reason) => println!("skipped: {}", reason),
            }
        }
        Command::Finalize { table } => {
            let cutover = Cutover::new(catalog, executor, ledger, pacer, retry);
            cutover.finalize_backfilling_partitioned_table(&table).await?;
        }
        Command::ReplaceTable { table } => {
            let cutover = Cutover::new(catalog, executor, ledger, pacer, retry);
            cutover.replace_with_partitioned_table(&table).await?;
        }
        Command::RollbackReplace { table } => {
            let cutover = Cutover::new(catalog, executor, ledger, pacer, retry);
            cutover.rollback_replace_with_partitioned_table(&table).await?;
        }
        Command::DropArchive { table } => {
            let cutover = Cutover::new(catalog, executor, ledger, pacer, retry);
            cutover.drop_nonpartitioned_archive_table(&table).await?;
        }
        Command::AddIndex { table, name, columns } => {
            let helpers = IndexHelpers::new(catalog, executor, retry);
            let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
            report(
                helpers
                    .add_concurrent_partitioned_index(&table, &columns, &name)
                    .await?,
            );
        }
        Command::RemoveIndex { table, name } => {
            let helpers = IndexHelpers::new(catalog, executor, retry);
            report(
                helpers
                    .remove_concurrent_partitioned_index_by_name(&table, &name)
                    .await?,
            );
        }
        Command::FindDuplicateIndexes { table } => {
            let helpers = IndexHelpers::new(catalog, executor, retry);
            let duplicates = helpers.find_duplicate_indexes(&table).await?;
            if duplicates.is_empty() {
                println!("no duplicate indexes on {}", table);
            }
            for group in duplicates {
                println!("{}", group.join(", "));
            }
        }
        Command::AddForeignKey {
            source,
            column,
            target,
            on_delete,
            name,
            no_validate,
        } => {
            let helpers = ForeignKeyHelpers::new(catalog, executor, retry);
            report(
                helpers
                    .add_concurrent_partitioned_foreign_key(
                        &source,
                        &column,
                        &target,
                        parse_fk_action(&on_delete)?,
                        name.as_deref(),
                        !no_validate,
                    )
                    .await?,
            );
        }
        Command::ValidateForeignKey { source, column, name } => {
            let helpers = ForeignKeyHelpers::new(catalog, executor, retry);
            report(
                helpers
                    .validate_partitioned_foreign_key(&source, &column, name.as_deref())
                    .await?,
            );
        }
        Command::EnsureUniqueId { table, sequence } => {
            let helpers = UniquenessHelpers::new(catalog, executor, retry);
            report(helpers.ensure_unique_id(&table, sequence.as_deref()).await?);
        }
        Command::RevertUniqueId { table, sequence } => {
            let helpers = UniquenessHelpers::new(catalog, executor, retry);
            report(
                helpers
                    .revert_ensure_unique_id(&table, sequence.as_deref())
                    .await?,
            );
        }
    }

    Ok(())
}

fn report(outcome: Outcome) {
    match outcome {
        Outcome::Applied => println!("done"),
        Outcome::Skipped(reason) => println!("skipped: {}", reason),
    }
}

fn parse_fk_action(value: &str) -> Result<FkAction, String> {
    match value {
        "no-action" => Ok(FkAction::NoAction),
        "restrict" => Ok(FkAction::Restrict),
        "cascade" => Ok(FkAction::Cascade),
        "set-null" => Ok(FkAction::SetNull),
        other => Err(format!("unknown ON DELETE action: {}", other)),
    }
}
