mod config;

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    error::SyncFault, Action, ClientEvent, ClientOptions, HttpGateway, Identity, LocalIdentity,
    SessionSnapshot, SessionStatus, VotingClient,
};
use futures::StreamExt;
use shared::domain::{Address, ProposalId};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "voting", about = "Observe and drive a ledger voting session")]
struct Args {
    /// Config file; missing files are ignored.
    #[arg(long, global = true, default_value = "voting.toml")]
    config: PathBuf,
    #[arg(long, global = true)]
    gateway_url: Option<String>,
    #[arg(long, global = true)]
    account: Option<String>,
    #[arg(long, global = true)]
    network_id: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the synchronised session once.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Print a line for every snapshot revision until interrupted.
    Watch,
    RegisterVoter {
        voter: String,
    },
    OpenProposals,
    CloseProposals,
    OpenVoting,
    CloseVoting,
    Tally,
    Propose {
        description: String,
    },
    Vote {
        proposal_id: u64,
    },
}

impl Command {
    fn into_action(self) -> Result<Option<Action>> {
        let action = match self {
            Command::Status { .. } | Command::Watch => return Ok(None),
            Command::RegisterVoter { voter } => Action::RegisterVoter {
                voter: voter
                    .parse::<Address>()
                    .with_context(|| format!("invalid voter address '{voter}'"))?,
            },
            Command::OpenProposals => Action::OpenProposals,
            Command::CloseProposals => Action::CloseProposals,
            Command::OpenVoting => Action::OpenVoting,
            Command::CloseVoting => Action::CloseVoting,
            Command::Tally => Action::Tally,
            Command::Propose { description } => Action::SubmitProposal { description },
            Command::Vote { proposal_id } => Action::CastVote {
                proposal_id: ProposalId(proposal_id),
            },
        };
        Ok(Some(action))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut settings = config::load_settings(&args.config)?;
    if let Some(v) = args.gateway_url {
        settings.gateway_url = v;
    }
    if let Some(v) = args.account {
        settings.account = Some(v);
    }
    if let Some(v) = args.network_id {
        settings.network_id = v;
    }
    settings.validate()?;

    let identity = LocalIdentity::new(Identity {
        account: settings.account()?,
        network_id: settings.network_id(),
    });
    let gateway = HttpGateway::new(&settings.gateway_url)?;
    info!(gateway = %gateway.base_url(), account = %identity.current().account, "connecting");

    let client = VotingClient::start(Arc::new(gateway), identity, ClientOptions::default());
    let outcome = run(&client, args.command, Duration::from_secs(settings.sync_timeout_secs)).await;
    client.shutdown().await;
    outcome
}

async fn run(client: &VotingClient, command: Command, sync_timeout: Duration) -> Result<()> {
    let snapshot = wait_for_sync(client, sync_timeout).await?;

    match command {
        Command::Status { json: true } => {
            println!("{}", serde_json::to_string_pretty(&*snapshot)?);
        }
        Command::Status { json: false } => print_snapshot(&snapshot),
        Command::Watch => watch(client).await?,
        other => {
            let Some(action) = other.into_action()? else {
                return Ok(());
            };
            let kind = action.kind();
            let receipt = client.submit(action).await?;
            match receipt.block_number {
                Some(block) => println!("{kind}: tx {} included in block {block}", receipt.tx_hash),
                None => println!("{kind}: tx {} pending", receipt.tx_hash),
            }
        }
    }
    Ok(())
}

async fn wait_for_sync(client: &VotingClient, timeout: Duration) -> Result<Arc<SessionSnapshot>> {
    tokio::time::timeout(timeout, until_ready(client))
        .await
        .context("timed out waiting for the session to synchronise")?
}

async fn until_ready(client: &VotingClient) -> Result<Arc<SessionSnapshot>> {
    let mut snapshots = client.watch_snapshot();
    let mut events = client.subscribe_events();

    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        if snapshot.status == SessionStatus::Ready {
            return Ok(snapshot);
        }
        tokio::select! {
            changed = snapshots.changed() => {
                changed.context("session ended before synchronising")?;
            }
            event = events.recv() => match event {
                Ok(ClientEvent::Fault(SyncFault::UnknownPhase(err))) => {
                    bail!("ledger uses an unsupported workflow: {err}");
                }
                Ok(ClientEvent::Fault(fault)) => {
                    if client.snapshot().status == SessionStatus::Uninitialized {
                        bail!("synchronisation failed: {fault}");
                    }
                    warn!(error = %fault, "synchronising with a degraded view");
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => bail!("session ended before synchronising"),
            },
        }
    }
}

async fn watch(client: &VotingClient) -> Result<()> {
    let mut snapshots = Box::pin(client.snapshot_stream());
    let mut events = client.subscribe_events();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            next = snapshots.next() => {
                let Some(snapshot) = next else { break };
                print_summary(&snapshot);
            }
            event = events.recv() => match event {
                Ok(ClientEvent::Fault(fault)) => warn!(error = %fault, "session fault"),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            _ = &mut ctrl_c => break,
        }
    }
    Ok(())
}

fn role_label(snapshot: &SessionSnapshot) -> &'static str {
    match (snapshot.is_owner, snapshot.is_registered_voter) {
        (true, true) => "owner, voter",
        (true, false) => "owner",
        (false, true) => "voter",
        (false, false) => "none",
    }
}

fn phase_label(snapshot: &SessionSnapshot) -> String {
    snapshot
        .phase
        .map(|phase| phase.to_string())
        .unwrap_or_else(|| "-".into())
}

fn print_summary(snapshot: &SessionSnapshot) {
    println!(
        "[rev {}] {:?} phase={} voters={} proposals={} winner={}",
        snapshot.revision,
        snapshot.status,
        phase_label(snapshot),
        snapshot.voters.len(),
        snapshot.proposals.len(),
        snapshot
            .winner_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".into()),
    );
}

fn print_snapshot(snapshot: &SessionSnapshot) {
    let caller = snapshot
        .caller
        .as_ref()
        .map(Address::to_string)
        .unwrap_or_default();
    println!("account:   {caller} ({})", role_label(snapshot));
    println!("phase:     {}", phase_label(snapshot));
    if let Some(height) = snapshot.sync_height {
        println!("synced at: block {height}");
    }

    println!("voters:    {}", snapshot.voters.len());
    for voter in &snapshot.voters {
        match voter.voted_proposal_id {
            Some(id) => println!("  {} voted for #{id}", voter.address),
            None => println!("  {}", voter.address),
        }
    }

    println!("proposals: {}", snapshot.proposals.len());
    for proposal in &snapshot.proposals {
        println!(
            "  #{:<3} {:>4} votes  {}  (by {})",
            proposal.id.0,
            proposal.vote_count,
            proposal.description,
            proposal.submitter.short()
        );
    }

    if let Some(winner) = snapshot.winner() {
        println!("winner:    #{} {}", winner.id, winner.description);
    } else if let Some(id) = snapshot.winner_id {
        println!("winner:    #{id}");
    }
    for kind in &snapshot.degraded {
        println!("warning:   {kind} events are incomplete; resync to recover");
    }
}
