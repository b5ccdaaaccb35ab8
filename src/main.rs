use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use boardsync::config::Config;
use boardsync::remote::trello::TrelloClient;
use boardsync::remote::RemoteBoardClient;
use boardsync::sync::engine::{CycleReport, SyncEngine};
use boardsync::types::EntityKey;

#[derive(Parser)]
#[command(name = "boardsync", version, about = "Sync markdown card mirrors with a remote task board")]
struct Cli {
    /// Path to boardsync.yaml; discovered by walking up from the current
    /// directory when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pull remote changes into one card file without pushing.
    Pull {
        path: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },
    /// Pull a whole board into the mirror, creating missing card files.
    PullBoard {
        board_id: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Fully reconcile one card file, pushing local changes.
    Push {
        path: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },
    /// Reconcile every card file under the mirror root.
    PushAll {
        /// Restrict to cards of one board.
        #[arg(long)]
        board: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Report sync status of every tracked card.
    Status,
    /// Acknowledge conflicts on a card so the remote values are adopted.
    Ack {
        card_id: String,
        /// Restrict to one checklist item, as "<checklist>/<item>".
        #[arg(long)]
        item: Option<String>,
    },
    /// List boards visible to the configured credentials.
    ListBoards,
    /// Show the lists and cards of one board.
    ShowBoard { board_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let client = Arc::new(TrelloClient::from_env().context(
        "Trello credentials required: set TRELLO_API_KEY and TRELLO_TOKEN",
    )?);
    let engine = SyncEngine::from_config(client.clone(), &config);

    match cli.command {
        Command::Pull { path, dry_run } => {
            let report = engine.pull_card(&path, dry_run).await?;
            print_report(&report);
        }
        Command::PullBoard { board_id, dry_run } => {
            let report = engine.pull_board(&board_id, &config, dry_run).await?;
            for planned in &report.planned {
                println!("would {planned}");
            }
            println!(
                "{} cards: {} created, {} refreshed, {} skipped, {} failed",
                report.total, report.created, report.refreshed, report.skipped, report.failed
            );
            if report.failed > 0 {
                anyhow::bail!("{} cards failed to pull", report.failed);
            }
        }
        Command::Push { path, dry_run } => {
            let report = engine.sync_card(&path, dry_run).await?;
            print_report(&report);
        }
        Command::PushAll { board, dry_run } => {
            let report = engine.sync_all(&config, board.as_deref(), dry_run).await;
            for card in &report.reports {
                print_report(card);
            }
            for (path, err) in &report.failures {
                eprintln!("{}: {err}", path.display());
            }
            if !report.failures.is_empty() {
                anyhow::bail!("{} cards failed to sync", report.failures.len());
            }
        }
        Command::Status => {
            let records = engine.status()?;
            if records.is_empty() {
                println!("no tracked cards");
            }
            for record in records {
                println!(
                    "{}  {}  {} conflicts{}",
                    record.card_id,
                    record.sync_status,
                    record.conflicts.len(),
                    record
                        .last_local_sync
                        .map(|t| format!(", last synced {}", t.to_rfc3339()))
                        .unwrap_or_default()
                );
            }
        }
        Command::Ack { card_id, item } => {
            let key = item
                .as_deref()
                .map(parse_item_key)
                .transpose()
                .map_err(|e| anyhow::anyhow!(e))?;
            let cleared = engine.acknowledge(&card_id, key.as_ref()).await?;
            println!("acknowledged {cleared} conflict(s) on {card_id}");
        }
        Command::ListBoards => {
            for board in client.list_boards().await? {
                let org = board.organization.as_deref().unwrap_or("personal");
                println!("{}  {}  ({org})", board.id, board.name);
            }
        }
        Command::ShowBoard { board_id } => {
            let board = client.board(&board_id).await?;
            println!("{} ({})", board.name, board.id);
            for list in client.board_lists(&board_id).await? {
                if list.closed {
                    continue;
                }
                println!("  {}", list.name);
                for card in client.cards_in_list(&list.id).await? {
                    println!("    {}  {}", card.id, card.name);
                }
            }
        }
    }
    Ok(())
}

fn print_report(report: &CycleReport) {
    if report.dry_run {
        println!("{} ({}):", report.card_id, report.path.display());
        if report.planned.is_empty() {
            println!("  nothing to do");
        }
        for action in &report.planned {
            println!("  would {action}");
        }
        return;
    }
    println!(
        "{}  {}  {} pushed, {} pulled, {} pending, {} conflicts",
        report.card_id,
        report.status,
        report.pushed,
        report.pulled,
        report.pending,
        report.conflicts
    );
}

fn parse_item_key(spec: &str) -> Result<EntityKey, String> {
    match spec.split_once('/') {
        Some((checklist, item)) if !checklist.is_empty() && !item.is_empty() => {
            Ok(EntityKey::Item {
                checklist: checklist.to_string(),
                item: item.to_string(),
            })
        }
        _ => Err(format!("expected \"<checklist>/<item>\", got {spec:?}")),
    }
}
