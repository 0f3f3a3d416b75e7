/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Assembly of a replica from its modules.
//!
//! A replica is a composition of named modules, built leaves-first: the crypto primitive and its
//! cache, the block chain store, the configuration, leader rotation, the consensus rules, the
//! synchronizer, and the consensus driver, all sequenced by one event loop. The
//! [`ReplicaBuilder`] performs this construction with explicit dependency injection: each module
//! receives its collaborators at construction, and consensus/crypto/rotation variants are
//! resolved from their configured names through closed constructor tables
//! ([`RulesChoice`](crate::rules::RulesChoice), [`CryptoChoice`],
//! [`RotationChoice`](crate::leader_rotation::RotationChoice)).
//!
//! The result is a [`Replica`]: a [`ReplicaCore`] owning every module, plus the
//! [`EventLoop`] that dispatches events to it. The caller decides how the loop is driven: a
//! thread pumping transport messages and periodic ticks in production, the
//! [twins simulator](crate::twins) in tests.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use ed25519_dalek::SigningKey;

use crate::app::{CommandSource, Executor};
use crate::block_chain::{BlockChain, SharedBlockChain};
use crate::configuration::{Configuration, KeyStore};
use crate::consensus::Consensus;
use crate::crypto::cache::{Cache, DEFAULT_CACHE_CAPACITY};
use crate::crypto::ed25519::Ed25519;
use crate::crypto::{CryptoBase, Keypair, Signer};
use crate::event_loop::{EventLoop, EventSink};
use crate::events::{Event, EventKind, ViewChangeEvent};
use crate::leader_rotation::{LeaderRotation, RotationChoice, RotationContext};
use crate::logging;
use crate::rules::{Rules, RulesChoice};
use crate::synchronizer::view_duration::{AdaptiveDuration, ViewDuration};
use crate::synchronizer::Synchronizer;
use crate::types::{CryptoHash, QuorumCertificate, ReplicaID, ViewNumber};

/// Startup configuration of a replica: its identity and the variant names and tuning parameters
/// of its modules.
pub struct ReplicaConfig {
    pub id: ReplicaID,
    pub signing_key: SigningKey,
    /// Consensus rules variant: "chained" or "fast".
    pub consensus_variant: String,
    /// Crypto variant: "ed25519".
    pub crypto_variant: String,
    /// Leader rotation policy: "round-robin" or "carousel".
    pub leader_rotation: String,
    /// Timeout of the first view, before the estimator has samples.
    pub initial_view_timeout: Duration,
    /// Backoff multiplier applied to the view timeout per timed-out view.
    pub timeout_multiplier: f64,
    /// Number of successful view durations the estimator keeps.
    pub duration_sample_window: usize,
    /// Weight of the standard deviation in the estimated view duration.
    pub duration_stdev_beta: f64,
    /// Capacity of the signature verification cache.
    pub crypto_cache_capacity: usize,
}

impl ReplicaConfig {
    /// A configuration with default tuning for `id`.
    pub fn new(id: ReplicaID, signing_key: SigningKey) -> ReplicaConfig {
        ReplicaConfig {
            id,
            signing_key,
            consensus_variant: "chained".to_string(),
            crypto_variant: "ed25519".to_string(),
            leader_rotation: "round-robin".to_string(),
            initial_view_timeout: Duration::from_secs(1),
            timeout_multiplier: 1.2,
            duration_sample_window: 100,
            duration_stdev_beta: 1.5,
            crypto_cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// A configuration problem found while assembling a replica. Fatal at startup.
#[derive(Debug)]
pub enum ConfigurationError {
    UnknownConsensusVariant(String),
    UnknownCryptoVariant(String),
    UnknownLeaderRotation(String),
    /// The local replica's ID is not in the key store.
    UnknownReplica(ReplicaID),
    EmptyConfiguration,
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::UnknownConsensusVariant(name) => {
                write!(f, "unknown consensus variant: '{}'", name)
            }
            ConfigurationError::UnknownCryptoVariant(name) => {
                write!(f, "unknown crypto variant: '{}'", name)
            }
            ConfigurationError::UnknownLeaderRotation(name) => {
                write!(f, "unknown leader rotation: '{}'", name)
            }
            ConfigurationError::UnknownReplica(id) => {
                write!(f, "replica {} is not in the key store", id)
            }
            ConfigurationError::EmptyConfiguration => write!(f, "the key store is empty"),
        }
    }
}

/// The crypto variants known to this crate, constructible by name. Every variant is wrapped in
/// the verification cache.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CryptoChoice {
    Ed25519,
}

impl CryptoChoice {
    pub fn from_name(name: &str) -> Option<CryptoChoice> {
        match name {
            "ed25519" => Some(CryptoChoice::Ed25519),
            _ => None,
        }
    }

    pub fn build(
        &self,
        id: ReplicaID,
        keypair: Keypair,
        keys: Rc<KeyStore>,
        cache_capacity: usize,
    ) -> Box<dyn CryptoBase> {
        match self {
            CryptoChoice::Ed25519 => {
                Box::new(Cache::new(Ed25519::new(id, keypair, keys), cache_capacity))
            }
        }
    }
}

/// One consensus instance: every module a replica is composed of. All state transitions happen
/// through the handler methods dispatched by the event loop.
pub struct ReplicaCore {
    pub(crate) id: ReplicaID,
    pub(crate) replica_ids: Vec<ReplicaID>,
    pub(crate) signer: Signer,
    pub(crate) chain: SharedBlockChain,
    pub(crate) config: Box<dyn Configuration>,
    pub(crate) rules: Box<dyn Rules>,
    pub(crate) rotation: Box<dyn LeaderRotation>,
    pub(crate) synchronizer: Synchronizer,
    pub(crate) consensus: Consensus,
    pub(crate) commands: Box<dyn CommandSource>,
    pub(crate) executor: Box<dyn Executor>,
}

impl ReplicaCore {
    pub fn id(&self) -> ReplicaID {
        self.id
    }

    /// The view this replica is currently in.
    pub fn current_view(&self) -> ViewNumber {
        self.synchronizer.current_view()
    }

    /// The view of the highest quorum certificate this replica has verified.
    pub fn high_qc_view(&self) -> ViewNumber {
        self.synchronizer.high_qc().view
    }

    /// The view of the highest executed block.
    pub fn executed_view(&self) -> ViewNumber {
        self.consensus.executed_view()
    }

    /// The hash of the highest executed block.
    pub fn executed(&self) -> CryptoHash {
        self.consensus.executed()
    }

    /// The leader of `view` under the configured rotation policy.
    pub fn leader_of(&self, view: ViewNumber) -> ReplicaID {
        let chain = self.chain.borrow();
        let ctx = RotationContext {
            replicas: &self.replica_ids,
            chain: &chain,
            committed: self.consensus.executed(),
            chain_length: self.rules.chain_length(),
        };
        self.rotation.leader(view, &ctx)
    }
}

/// A fully assembled replica: the core and the event loop that drives it.
pub struct Replica {
    core: ReplicaCore,
    event_loop: EventLoop<ReplicaCore>,
}

impl Replica {
    /// Enqueue an event for processing.
    pub fn enqueue(&mut self, event: Event) {
        self.event_loop.add_event(event);
    }

    /// Dispatch one queued event. Returns whether the queue was non-empty.
    pub fn tick(&mut self) -> bool {
        self.event_loop.tick(&mut self.core)
    }

    /// Dispatch queued events until the queue is empty.
    pub fn drain(&mut self) {
        self.event_loop.drain(&mut self.core);
    }

    pub fn core(&self) -> &ReplicaCore {
        &self.core
    }

    /// Register an observer on this replica's event loop.
    pub fn register_observer(&mut self, kind: EventKind, observer: crate::event_loop::Observer) {
        self.event_loop.register_observer(kind, observer);
    }
}

/// Builds a [`Replica`] in dependency order, handing each module its collaborators.
pub struct ReplicaBuilder {
    config: ReplicaConfig,
    keys: Rc<KeyStore>,
    configuration: Box<dyn Configuration>,
    commands: Box<dyn CommandSource>,
    executor: Box<dyn Executor>,
    chain: Option<SharedBlockChain>,
    view_duration: Option<Box<dyn ViewDuration>>,
    rotation: Option<Box<dyn LeaderRotation>>,
    log_events: bool,
}

impl ReplicaBuilder {
    pub fn new(
        config: ReplicaConfig,
        keys: Rc<KeyStore>,
        configuration: Box<dyn Configuration>,
        commands: Box<dyn CommandSource>,
        executor: Box<dyn Executor>,
    ) -> ReplicaBuilder {
        ReplicaBuilder {
            config,
            keys,
            configuration,
            commands,
            executor,
            chain: None,
            view_duration: None,
            rotation: None,
            log_events: false,
        }
    }

    /// Use `chain` instead of a freshly created block chain store. The twins simulator shares
    /// each node's store with the network so fetches can be answered.
    pub fn with_chain(mut self, chain: SharedBlockChain) -> ReplicaBuilder {
        self.chain = Some(chain);
        self
    }

    /// Override the view duration estimator. Simulation passes a fixed duration here and drives
    /// timeouts from the simulated clock instead.
    pub fn with_view_duration(mut self, duration: Box<dyn ViewDuration>) -> ReplicaBuilder {
        self.view_duration = Some(duration);
        self
    }

    /// Override the leader rotation policy with an already-built one. The twins simulator routes
    /// leadership through its view plan this way.
    pub fn with_leader_rotation(mut self, rotation: Box<dyn LeaderRotation>) -> ReplicaBuilder {
        self.rotation = Some(rotation);
        self
    }

    /// Register the default logging observers on the event loop.
    pub fn log_events(mut self, log: bool) -> ReplicaBuilder {
        self.log_events = log;
        self
    }

    pub fn build(self) -> Result<Replica, ConfigurationError> {
        let ReplicaBuilder {
            config,
            keys,
            configuration,
            commands,
            executor,
            chain,
            view_duration,
            rotation,
            log_events,
        } = self;

        if keys.is_empty() {
            return Err(ConfigurationError::EmptyConfiguration);
        }
        if !keys.contains(&config.id) {
            return Err(ConfigurationError::UnknownReplica(config.id));
        }

        let rules = RulesChoice::from_name(&config.consensus_variant)
            .ok_or_else(|| {
                ConfigurationError::UnknownConsensusVariant(config.consensus_variant.clone())
            })?
            .build();
        let rotation = match rotation {
            Some(rotation) => rotation,
            None => RotationChoice::from_name(&config.leader_rotation)
                .ok_or_else(|| {
                    ConfigurationError::UnknownLeaderRotation(config.leader_rotation.clone())
                })?
                .build(),
        };
        let crypto = CryptoChoice::from_name(&config.crypto_variant)
            .ok_or_else(|| ConfigurationError::UnknownCryptoVariant(config.crypto_variant.clone()))?
            .build(
                config.id,
                Keypair::new(config.signing_key.clone()),
                keys.clone(),
                config.crypto_cache_capacity,
            );
        let signer = Signer::new(crypto);

        let chain = chain.unwrap_or_else(|| Rc::new(RefCell::new(BlockChain::new())));
        let genesis_hash = chain.borrow().genesis_hash();
        let duration = view_duration.unwrap_or_else(|| {
            Box::new(AdaptiveDuration::new(
                config.initial_view_timeout,
                config.duration_sample_window,
                config.duration_stdev_beta,
                config.timeout_multiplier,
            ))
        });
        let synchronizer = Synchronizer::new(QuorumCertificate::genesis_qc(genesis_hash), duration);
        let consensus = Consensus::new(genesis_hash);
        let replica_ids = configuration.replicas();

        let core = ReplicaCore {
            id: config.id,
            replica_ids,
            signer,
            chain,
            config: configuration,
            rules,
            rotation,
            synchronizer,
            consensus,
            commands,
            executor,
        };

        let mut event_loop = EventLoop::new();
        register_core_handlers(&mut event_loop);
        if log_events {
            logging::register_logging_observers(&mut event_loop, config.id);
        }
        // every replica starts its life by entering view 1
        event_loop.add_event(Event::ViewChange(ViewChangeEvent {
            view: ViewNumber::new(1),
            timeout: false,
        }));

        Ok(Replica { core, event_loop })
    }
}

/// Wire the core's handler methods to their event kinds: exactly one handler per kind.
fn register_core_handlers(event_loop: &mut EventLoop<ReplicaCore>) {
    event_loop.register_handler(
        EventKind::Tick,
        Box::new(|core: &mut ReplicaCore, _event, sink: &mut EventSink| {
            core.on_tick(sink);
        }),
    );
    event_loop.register_handler(
        EventKind::TimeoutElapsed,
        Box::new(|core, event, sink| {
            if let Event::TimeoutElapsed(e) = event {
                core.on_timeout_elapsed(e, sink);
            }
        }),
    );
    event_loop.register_handler(
        EventKind::ViewChange,
        Box::new(|core, event, sink| {
            if let Event::ViewChange(e) = event {
                core.on_view_change(e, sink);
            }
        }),
    );
    event_loop.register_handler(
        EventKind::Propose,
        Box::new(|core, event, sink| {
            if let Event::Propose(msg) = event {
                core.on_propose(msg, sink);
            }
        }),
    );
    event_loop.register_handler(
        EventKind::Vote,
        Box::new(|core, event, sink| {
            if let Event::Vote(msg) = event {
                core.on_vote(msg, sink);
            }
        }),
    );
    event_loop.register_handler(
        EventKind::Timeout,
        Box::new(|core, event, sink| {
            if let Event::Timeout(msg) = event {
                core.on_timeout_message(msg, sink);
            }
        }),
    );
    event_loop.register_handler(
        EventKind::NewView,
        Box::new(|core, event, sink| {
            if let Event::NewView(msg) = event {
                core.on_new_view(msg, sink);
            }
        }),
    );
}
