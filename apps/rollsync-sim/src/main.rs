mod player;

use std::time::Duration;

use clap::Parser;
use crossbeam_channel::Receiver;
use rollsync::{
    LinkConditions, LoopbackAdaptor, LoopbackNetwork, PeerId, SyncConfig, SyncEvent, SyncManager,
};
use tokio::time::MissedTickBehavior;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use player::Player;

/// Rollback synchronization simulator
#[derive(Parser, Debug)]
#[command(name = "rollsync-sim")]
#[command(about = "Run rollback-synchronized peers over a simulated lossy network", long_about = None)]
struct Args {
    /// Number of participants (peer 1 hosts)
    #[arg(long, default_value_t = 2)]
    peers: u32,

    /// Fixed ticks to run
    #[arg(long, default_value_t = 600)]
    ticks: u32,

    /// One-way latency, in ticks
    #[arg(long, default_value_t = 3)]
    latency: u64,

    /// Probability that a packet is lost
    #[arg(long, default_value_t = 0.0)]
    drop_rate: f64,

    /// Seed for packet loss and player movement
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Run ticks back to back instead of at the tick rate
    #[arg(long)]
    fast: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: Level,

    #[command(flatten)]
    sync: SyncConfig,
}

#[derive(Debug, Default)]
struct Report {
    rollbacks: u64,
    resimulated_ticks: u64,
    skip_flags: u64,
    sync_lost: u64,
    mismatches: u64,
    errors: Vec<String>,
}

impl Report {
    fn record(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::RollbackFlagged { .. } => self.rollbacks += 1,
            SyncEvent::TickFinished { is_rollback: true } => self.resimulated_ticks += 1,
            SyncEvent::SkipTickFlagged { .. } => self.skip_flags += 1,
            SyncEvent::SyncLost => self.sync_lost += 1,
            SyncEvent::RemoteStateMismatch { tick, peer, .. } => {
                warn!(tick, peer, "remote state mismatch");
                self.mismatches += 1;
            }
            SyncEvent::SyncError { message } => self.errors.push(message),
            _ => {}
        }
    }
}

struct Participant {
    manager: SyncManager<LoopbackAdaptor>,
    events: Receiver<SyncEvent>,
    report: Report,
}

fn player_path(id: PeerId) -> String {
    format!("/players/{id}")
}

fn build(args: &Args, net: &LoopbackNetwork) -> anyhow::Result<Vec<Participant>> {
    let ids: Vec<PeerId> = (1..=args.peers).collect();
    let mut participants = Vec::with_capacity(ids.len());
    for &local in &ids {
        let mut manager = SyncManager::new(local, 1, args.sync.clone(), net.adaptor(local))?;
        for &id in &ids {
            let seed = args.seed.wrapping_mul(31).wrapping_add(id as u64);
            manager
                .objects_mut()
                .register_with_inputs(player_path(id), id, Player::new(seed))?;
            if id != local {
                manager.add_peer(id)?;
            }
        }
        let events = manager.subscribe();
        participants.push(Participant {
            manager,
            events,
            report: Report::default(),
        });
    }
    Ok(participants)
}

/// Newest tick whose input every participant has received.
fn settled_tick(participants: &[Participant]) -> i32 {
    participants
        .iter()
        .flat_map(|p| {
            p.manager
                .peers()
                .map(|peer| peer.last_remote_tick_received)
                .chain(std::iter::once(p.manager.current_tick()))
                .collect::<Vec<_>>()
        })
        .min()
        .unwrap_or(0)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.peers < 2 {
        anyhow::bail!("--peers must be at least 2");
    }
    if !(0.0..=1.0).contains(&args.drop_rate) {
        anyhow::bail!("--drop-rate must be within [0, 1]");
    }
    args.sync.validate()?;

    let net = LoopbackNetwork::with_seed(args.seed);
    let mut participants = build(&args, &net)?;

    // Start over a clean link so every participant receives the start message.
    participants[0].manager.start()?;
    let tick_time = args.sync.tick_time();
    for p in participants.iter_mut() {
        p.manager.physics_tick(tick_time)?;
    }
    net.advance();
    net.set_default_link(LinkConditions {
        delay_steps: args.latency,
        drop_rate: args.drop_rate,
        blocked: false,
    });

    info!(
        peers = args.peers,
        ticks = args.ticks,
        latency = args.latency,
        drop_rate = args.drop_rate,
        "simulation started"
    );

    let mut interval = tokio::time::interval(Duration::from_secs_f32(tick_time));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    for _ in 0..args.ticks {
        if !args.fast {
            interval.tick().await;
        }
        for p in participants.iter_mut() {
            if let Err(err) = p.manager.process(tick_time) {
                warn!(peer = p.manager.local_id(), error = %err, "process failed");
            }
            if let Err(err) = p.manager.physics_tick(tick_time) {
                warn!(peer = p.manager.local_id(), error = %err, "tick failed");
            }
            for event in p.events.try_iter() {
                p.report.record(event);
            }
        }
        net.advance();
        if participants.iter().all(|p| !p.manager.is_started()) {
            warn!("every participant stopped");
            break;
        }
    }

    let tick = settled_tick(&participants);
    let reference = participants[0]
        .manager
        .state_buffer()
        .get(tick)
        .map(|f| f.data.clone());
    let agree = participants
        .iter()
        .all(|p| p.manager.state_buffer().get(tick).map(|f| &f.data) == reference.as_ref());

    for p in &participants {
        let r = &p.report;
        info!(
            peer = p.manager.local_id(),
            current_tick = p.manager.current_tick(),
            rollbacks = r.rollbacks,
            resimulated = r.resimulated_ticks,
            skip_flags = r.skip_flags,
            sync_lost = r.sync_lost,
            mismatches = r.mismatches,
            "participant summary"
        );
        for message in &r.errors {
            warn!(peer = p.manager.local_id(), %message, "sync error");
        }
    }
    let (sent, dropped) = net.stats();
    info!(sent, dropped, settled_tick = tick, agree, "network summary");

    participants[0].manager.stop();

    if !agree {
        anyhow::bail!("participants disagree on the state of tick {tick}");
    }
    Ok(())
}
