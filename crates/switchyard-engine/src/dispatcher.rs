//! The dispatcher: server lifecycle and the tick-driven drain loop.
//!
//! [`Dispatcher`] owns the transport, the declared services, and, while
//! initialized, a live session holding the [`ServiceRegistry`] and the
//! tag → [`RequestManager`] table. The host calls
//! [`tick()`](Dispatcher::tick) once per frame; each call runs one
//! bounded drain pass over the completion queue.
//!
//! # Threading
//!
//! The dispatcher is single-threaded: every state transition and every
//! handler invocation happens on the thread calling `tick()`. Handler
//! replies may be produced on any thread. They travel over a channel
//! and are applied at the start of the next pass, after each event,
//! and whenever a poll times out.
//!
//! # Spare slots
//!
//! Every declared method has exactly one manager in
//! [`RequestState::Requested`] while initialized. Accepting a call
//! duplicates its manager under a fresh tag and arms the duplicate
//! before the handler runs.

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use indexmap::IndexMap;
use smallvec::SmallVec;
use switchyard_core::{
    CallKind, QueueEvent, RegistryError, ServiceId, Status, Tag, TagAllocator, Transport,
    TransportError,
};

use crate::config::{ConfigError, DispatchConfig, TimeMode};
use crate::handler::{Envelope, HandlerDescriptor, ReplySink, SERVICE_NOT_ACTIVE};
use crate::metrics::{DispatchCounters, TickMetrics};
use crate::registry::ServiceRegistry;
use crate::request::{RequestManager, RequestState};

/// Longest time [`Dispatcher::deinitialize()`] keeps polling for the
/// queue's final `Shutdown` event.
const FLUSH_LIMIT: Duration = Duration::from_secs(1);

// ── DispatchError ──────────────────────────────────────────────────

/// Errors returned by [`Dispatcher`] operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchError {
    /// The operation needs a running server.
    NotInitialized,
    /// [`Dispatcher::initialize()`] was called on a running server.
    AlreadyInitialized,
    /// The transport failed to start.
    Transport(TransportError),
    /// Registration or activation was rejected.
    Registry(RegistryError),
    /// The configuration is invalid.
    Config(ConfigError),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "dispatcher is not initialized"),
            Self::AlreadyInitialized => write!(f, "dispatcher is already initialized"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Registry(e) => write!(f, "registry: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
        }
    }
}

impl Error for DispatchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Registry(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::NotInitialized | Self::AlreadyInitialized => None,
        }
    }
}

impl From<TransportError> for DispatchError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<RegistryError> for DispatchError {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}

impl From<ConfigError> for DispatchError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ── Session ────────────────────────────────────────────────────────

/// State that exists only while the server runs.
struct Session {
    registry: ServiceRegistry,
    managers: IndexMap<Tag, RequestManager>,
    replies_tx: Sender<Envelope>,
    replies_rx: Receiver<Envelope>,
}

impl Session {
    fn new() -> Self {
        let (replies_tx, replies_rx) = unbounded();
        Self {
            registry: ServiceRegistry::new(),
            managers: IndexMap::new(),
            replies_tx,
            replies_rx,
        }
    }

    /// Add a service and arm one slot per method.
    fn open<T: Transport>(
        &mut self,
        transport: &mut T,
        tags: &mut TagAllocator,
        service: &ServiceId,
        descriptors: &[Rc<HandlerDescriptor>],
    ) -> Result<(), RegistryError> {
        self.registry.insert(service.clone(), descriptors.to_vec())?;
        for d in descriptors {
            let manager = RequestManager::new(tags.next(), service.clone(), Rc::clone(d));
            self.arm(transport, manager);
        }
        Ok(())
    }

    fn arm<T: Transport>(&mut self, transport: &mut T, mut manager: RequestManager) {
        manager.init(transport);
        let tag = manager.tag();
        let replaced = self.managers.insert(tag, manager);
        debug_assert!(replaced.is_none(), "tag {tag} issued twice");
    }

    /// Advance the manager owning `tag` for one completion event.
    ///
    /// # Panics
    ///
    /// If the event reaches a manager that has no operation in flight
    /// (`UNINITIALIZED` or `HANDLING`). The transport contract rules
    /// this out.
    fn handle_event<T: Transport>(
        &mut self,
        transport: &mut T,
        tags: &mut TagAllocator,
        tag: Tag,
        ok: bool,
        m: &mut TickMetrics,
    ) {
        let Some(manager) = self.managers.get_mut(&tag) else {
            m.events_dropped += 1;
            tracing::trace!(%tag, ok, "event for retired call dropped");
            return;
        };
        if !ok {
            let state = manager.state();
            self.managers.swap_remove(&tag);
            count_closed(m, state);
            tracing::debug!(%tag, %state, "call closed by transport");
            return;
        }

        match manager.state() {
            state @ (RequestState::Uninitialized | RequestState::Handling) => {
                panic!("completion event for tag {tag} in state {state}")
            }
            RequestState::Requested => {
                let mut spare = manager.duplicate(tags.next());
                spare.init(transport);
                manager.begin_handling(transport.take_request(tag));
                m.calls_accepted += 1;
                tracing::trace!(%tag, spare = %spare.tag(), method = %manager.method(), "call accepted");

                let instance = self.registry.active_instance(manager.service());
                manager.invoke(
                    instance.as_deref(),
                    ReplySink::new(tag, self.replies_tx.clone()),
                );
                let spare_tag = spare.tag();
                self.managers.insert(spare_tag, spare);
            }
            RequestState::Responding => {
                manager.resume();
                let instance = self.registry.active_instance(manager.service());
                manager.invoke(
                    instance.as_deref(),
                    ReplySink::new(tag, self.replies_tx.clone()),
                );
            }
            RequestState::Finishing => {
                self.managers.swap_remove(&tag);
                m.calls_finished += 1;
            }
        }
    }

    /// Apply every queued handler reply.
    fn apply_replies<T: Transport>(&mut self, transport: &mut T, m: &mut TickMetrics) {
        while let Ok(Envelope { tag, reply }) = self.replies_rx.try_recv() {
            let Some(manager) = self.managers.get_mut(&tag) else {
                m.replies_discarded += 1;
                tracing::debug!(%tag, "reply for a retired call discarded");
                continue;
            };
            match manager.apply(reply, transport) {
                Ok(RequestState::Responding) => m.stream_writes += 1,
                Ok(_) => match manager.kind() {
                    CallKind::Unary => m.final_writes += 1,
                    CallKind::Streaming => m.stream_finishes += 1,
                },
                Err(reason) => {
                    m.replies_discarded += 1;
                    tracing::warn!(%tag, %reason, "handler reply discarded");
                }
            }
        }
    }
}

/// Count a manager torn down without finishing. An armed slot never
/// carried a call, so it is not an aborted call.
fn count_closed(m: &mut TickMetrics, state: RequestState) {
    if state == RequestState::Requested {
        m.slots_cancelled += 1;
    } else {
        m.calls_aborted += 1;
    }
}

// ── Dispatcher ─────────────────────────────────────────────────────

/// Accepts calls from a completion-queue [`Transport`], runs their
/// handlers, and writes the replies back.
///
/// # Example
///
/// ```ignore
/// let mut dispatcher = Dispatcher::new(transport, DispatchConfig::default())?;
/// dispatcher.register("tempo.Time", vec![HandlerDescriptor::unary("Now", Clock::now)])?;
/// dispatcher.initialize(10001)?;
/// dispatcher.activate_service("tempo.Time", &clock)?;
/// loop {
///     dispatcher.tick();
/// }
/// ```
pub struct Dispatcher<T: Transport> {
    transport: T,
    config: DispatchConfig,
    catalog: IndexMap<ServiceId, Vec<Rc<HandlerDescriptor>>>,
    /// Activations made while stopped, applied by the next start.
    early: IndexMap<ServiceId, Weak<dyn Any>>,
    tags: TagAllocator,
    session: Option<Session>,
    port: Option<u16>,
    counters: DispatchCounters,
    last_metrics: TickMetrics,
}

impl<T: Transport> Dispatcher<T> {
    /// Create a stopped dispatcher over `transport`.
    pub fn new(transport: T, config: DispatchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            transport,
            config,
            catalog: IndexMap::new(),
            early: IndexMap::new(),
            tags: TagAllocator::new(),
            session: None,
            port: None,
            counters: DispatchCounters::default(),
            last_metrics: TickMetrics::default(),
        })
    }

    /// Declare a service and its handlers.
    ///
    /// Declarations survive restarts. The service's slots are armed by
    /// the next [`initialize()`](Self::initialize). A running server is
    /// restarted through [`reinitialize()`](Self::reinitialize) so the
    /// transport is rebuilt with the new service; active services stay
    /// bound and in-flight calls are lost.
    pub fn register(
        &mut self,
        service: impl Into<ServiceId>,
        descriptors: Vec<HandlerDescriptor>,
    ) -> Result<(), DispatchError> {
        let service = service.into();
        if self.catalog.contains_key(&service) {
            return Err(RegistryError::AlreadyRegistered { service }.into());
        }
        ServiceRegistry::check(&service, &descriptors)?;
        let descriptors: Vec<Rc<HandlerDescriptor>> =
            descriptors.into_iter().map(Rc::new).collect();
        tracing::debug!(%service, methods = descriptors.len(), "service registered");
        self.catalog.insert(service.clone(), descriptors);

        if self.session.is_some() {
            tracing::info!(%service, "service added to a running server, restarting");
            self.reinitialize()?;
        }
        Ok(())
    }

    /// Start the server on `port` and arm one slot per declared method.
    ///
    /// # Errors
    ///
    /// [`DispatchError::AlreadyInitialized`] on a running server,
    /// [`DispatchError::Config`] for a port below 1024, and
    /// [`DispatchError::Transport`] if the server fails to start, in
    /// which case the dispatcher stays stopped and ticks are no-ops.
    pub fn initialize(&mut self, port: u16) -> Result<(), DispatchError> {
        if self.session.is_some() {
            return Err(DispatchError::AlreadyInitialized);
        }
        DispatchConfig::validate_port(port)?;

        let address = self.config.address(port);
        self.transport.add_listening_port(&address);
        for service in self.catalog.keys() {
            self.transport.register_service(service);
        }
        self.transport.set_compression(self.config.compression);
        if let Err(e) = self.transport.build_and_start() {
            tracing::error!(%address, error = %e, "server failed to start");
            return Err(e.into());
        }

        let mut session = Session::new();
        for (service, descriptors) in &self.catalog {
            session.open(&mut self.transport, &mut self.tags, service, descriptors)?;
        }
        for (service, instance) in self.early.drain(..) {
            if session.registry.rebind(&service, instance) {
                tracing::info!(%service, "activating service");
            } else {
                tracing::debug!(%service, "instance dropped before start, not activated");
            }
        }
        tracing::info!(
            %address,
            services = self.catalog.len(),
            slots = session.managers.len(),
            "server listening"
        );
        self.session = Some(session);
        self.port = Some(port);
        Ok(())
    }

    /// Stop the server and drop every in-flight call.
    ///
    /// Waits up to the configured shutdown deadline for in-flight calls,
    /// then drains the completion queue until it reports shutdown.
    /// Calling this on a stopped dispatcher does nothing.
    pub fn deinitialize(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        self.transport.shutdown(self.config.shutdown_deadline());
        self.transport.shutdown_queue();

        let mut m = TickMetrics::default();
        let wait = self.config.max_event_wait();
        let give_up = Instant::now() + FLUSH_LIMIT;
        loop {
            match self.transport.next(wait) {
                QueueEvent::GotEvent { tag, ok: false } => {
                    if let Some(r) = session.managers.swap_remove(&tag) {
                        count_closed(&mut m, r.state());
                    }
                }
                QueueEvent::GotEvent { .. } => {}
                QueueEvent::Timeout if Instant::now() < give_up => {}
                QueueEvent::Timeout => {
                    tracing::warn!(
                        remaining = session.managers.len(),
                        "completion queue did not report shutdown in time"
                    );
                    break;
                }
                QueueEvent::Shutdown => break,
            }
        }
        let abandoned = session.managers.len();
        for r in session.managers.values() {
            count_closed(&mut m, r.state());
        }
        self.counters.absorb(&m);
        tracing::info!(
            aborted = m.calls_aborted,
            cancelled = m.slots_cancelled,
            abandoned,
            "server stopped"
        );
    }

    /// Restart the server on the last port, keeping active services.
    ///
    /// Services whose instance is still alive are reactivated with that
    /// same instance once the server is back up. In-flight calls are
    /// lost.
    pub fn reinitialize(&mut self) -> Result<(), DispatchError> {
        let snapshot = self
            .session
            .as_ref()
            .map(|s| s.registry.active_bindings())
            .unwrap_or_default();
        self.deinitialize();

        let port = self.port.unwrap_or(self.config.port);
        if let Err(e) = self.initialize(port) {
            if !snapshot.is_empty() {
                tracing::warn!(
                    services = snapshot.len(),
                    "restart failed, active services were not restored"
                );
            }
            return Err(e);
        }
        if let Some(session) = self.session.as_mut() {
            for (service, instance) in snapshot {
                if session.registry.rebind(&service, instance) {
                    tracing::info!(%service, "reactivating service");
                } else {
                    tracing::debug!(%service, "instance dropped during restart, not reactivated");
                }
            }
        }
        Ok(())
    }

    /// Bind `instance` as the target of the service's handlers.
    ///
    /// On a stopped server the binding is recorded and applied by the
    /// next successful [`initialize()`](Self::initialize).
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotRegistered`] for an undeclared service and
    /// [`RegistryError::InstanceTypeMismatch`] for the wrong type.
    pub fn activate_service<S: 'static>(
        &mut self,
        service: impl Into<ServiceId>,
        instance: &Rc<S>,
    ) -> Result<(), DispatchError> {
        let service = self.declared(service)?;
        if let Some(session) = self.session.as_mut() {
            session.registry.activate(&service, instance)?;
            tracing::debug!(%service, "service activated");
            return Ok(());
        }
        let descriptors = self.catalog.get(&service).map_or(&[][..], Vec::as_slice);
        if ServiceRegistry::binds::<S>(&service, descriptors)? {
            let erased: Rc<dyn Any> = Rc::clone(instance) as Rc<dyn Any>;
            self.early.insert(service.clone(), Rc::downgrade(&erased));
            tracing::debug!(%service, "activation recorded until the server starts");
        }
        Ok(())
    }

    /// Unbind the service's instance.
    ///
    /// Replies already produced are applied first. Every call of the
    /// service still waiting on an instance-bound handler is then closed
    /// with `UNAVAILABLE`. Armed slots stay armed. On a stopped server
    /// this only forgets an activation recorded before start.
    pub fn deactivate_service(
        &mut self,
        service: impl Into<ServiceId>,
    ) -> Result<(), DispatchError> {
        let service = self.declared(service)?;
        let Some(session) = self.session.as_mut() else {
            self.early.shift_remove(&service);
            return Ok(());
        };

        let mut m = TickMetrics::default();
        session.apply_replies(&mut self.transport, &mut m);
        self.counters.absorb(&m);

        let was_active = session.registry.deactivate(&service)?;
        let mut failed = 0u64;
        for manager in session.managers.values_mut() {
            if manager.service() == &service
                && manager.state() == RequestState::Handling
                && manager.descriptor().needs_instance()
            {
                manager.terminate(Status::unavailable(SERVICE_NOT_ACTIVE), &mut self.transport);
                failed += 1;
            }
        }
        self.counters.deactivation_failures += failed;
        tracing::debug!(%service, was_active, failed, "service deactivated");
        Ok(())
    }

    /// Run one drain pass with the configured time mode and budgets.
    pub fn tick(&mut self) -> TickMetrics {
        self.drain(
            self.config.time_mode,
            self.config.max_event_processing(),
            self.config.max_event_wait(),
        )
    }

    /// Run one drain pass.
    ///
    /// Each poll waits at most `wait`. In [`TimeMode::WallClock`] the
    /// pass ends at the first idle poll or once `budget` is spent. In
    /// [`TimeMode::FixedStep`] the budget is ignored and the pass ends
    /// at an idle poll only after every write that was in flight when
    /// the pass started has completed.
    ///
    /// A stopped dispatcher returns immediately with empty metrics.
    ///
    /// # Panics
    ///
    /// If the transport delivers a completion for a call that has no
    /// operation in flight.
    pub fn drain(&mut self, mode: TimeMode, budget: Duration, wait: Duration) -> TickMetrics {
        let Some(session) = self.session.as_mut() else {
            return TickMetrics::default();
        };
        let start = Instant::now();
        let mut m = TickMetrics::default();

        session.apply_replies(&mut self.transport, &mut m);
        let mut awaited: SmallVec<[Tag; 8]> = session
            .managers
            .values()
            .filter(|r| r.state().has_write_in_flight())
            .map(RequestManager::tag)
            .collect();
        m.awaited_writes = awaited.len() as u64;

        loop {
            if mode == TimeMode::WallClock && start.elapsed() > budget {
                m.budget_exhausted = true;
                break;
            }
            m.polls += 1;
            match self.transport.next(wait) {
                QueueEvent::GotEvent { tag, ok } => {
                    m.events += 1;
                    if let Some(i) = awaited.iter().position(|t| *t == tag) {
                        awaited.swap_remove(i);
                    }
                    session.handle_event(&mut self.transport, &mut self.tags, tag, ok, &mut m);
                    session.apply_replies(&mut self.transport, &mut m);
                }
                QueueEvent::Timeout => {
                    session.apply_replies(&mut self.transport, &mut m);
                    if mode == TimeMode::WallClock || awaited.is_empty() {
                        break;
                    }
                }
                QueueEvent::Shutdown => {
                    tracing::error!("completion queue shut down while the server was running");
                    break;
                }
            }
        }

        m.elapsed_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
        if m.budget_exhausted {
            tracing::trace!(elapsed_us = m.elapsed_us, "tick budget exhausted");
        }
        self.counters.record(&m);
        self.last_metrics = m.clone();
        m
    }

    /// Replace the configuration.
    ///
    /// A change of port, bind host or compression restarts a running
    /// server through [`reinitialize()`](Self::reinitialize). Other
    /// fields take effect on the next tick.
    pub fn update_config(&mut self, config: DispatchConfig) -> Result<(), DispatchError> {
        config.validate()?;
        let restart = self.session.is_some() && self.config.requires_restart(&config);
        if config.port != self.config.port {
            self.port = Some(config.port);
        }
        self.config = config;
        if restart {
            tracing::info!("server settings changed, restarting");
            self.reinitialize()?;
        }
        Ok(())
    }

    /// Switch the host time policy used by [`tick()`](Self::tick).
    pub fn set_time_mode(&mut self, mode: TimeMode) {
        if self.config.time_mode != mode {
            tracing::debug!(%mode, "time mode changed");
        }
        self.config.time_mode = mode;
    }

    /// Current host time policy.
    pub fn time_mode(&self) -> TimeMode {
        self.config.time_mode
    }

    /// Current configuration.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Whether the server is running.
    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    /// Port the running server listens on.
    pub fn port(&self) -> Option<u16> {
        self.session.as_ref().and(self.port)
    }

    /// Declared services, in declaration order.
    pub fn services(&self) -> impl Iterator<Item = &ServiceId> {
        self.catalog.keys()
    }

    /// The live registry, while running.
    pub fn registry(&self) -> Option<&ServiceRegistry> {
        self.session.as_ref().map(|s| &s.registry)
    }

    /// Whether the service has a live bound instance.
    pub fn is_service_active(&self, service: &str) -> bool {
        self.registry()
            .is_some_and(|r| r.is_active(&ServiceId::new(service)))
    }

    /// Number of live request managers, armed slots included.
    pub fn live_calls(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.managers.len())
    }

    /// State of the manager owning `tag`, if it is live.
    pub fn state_of(&self, tag: Tag) -> Option<RequestState> {
        self.session
            .as_ref()
            .and_then(|s| s.managers.get(&tag))
            .map(RequestManager::state)
    }

    /// Number of armed, waiting slots for one method.
    pub fn spare_slots(&self, service: &str, method: &str) -> usize {
        self.managers()
            .filter(|r| {
                r.state() == RequestState::Requested
                    && r.service().as_str() == service
                    && r.method().as_str() == method
            })
            .count()
    }

    /// Every live request manager.
    pub fn managers(&self) -> impl Iterator<Item = &RequestManager> {
        self.session
            .as_ref()
            .into_iter()
            .flat_map(|s| s.managers.values())
    }

    /// Lifetime totals.
    pub fn counters(&self) -> &DispatchCounters {
        &self.counters
    }

    /// Metrics of the most recent drain pass.
    pub fn last_metrics(&self) -> &TickMetrics {
        &self.last_metrics
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn declared(&self, service: impl Into<ServiceId>) -> Result<ServiceId, RegistryError> {
        let service = service.into();
        if self.catalog.contains_key(&service) {
            Ok(service)
        } else {
            Err(RegistryError::NotRegistered { service })
        }
    }
}

impl<T: Transport> Drop for Dispatcher<T> {
    fn drop(&mut self) {
        self.deinitialize();
    }
}

impl<T: Transport> fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("initialized", &self.is_initialized())
            .field("port", &self.port())
            .field("time_mode", &self.config.time_mode)
            .field("services", &self.catalog.len())
            .field("live_calls", &self.live_calls())
            .field("next_tag", &self.tags.peek())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::UnaryResponder;
    use switchyard_core::{CompressionLevel, MethodId, StatusCode};

    /// Transport whose queue is scripted by the test.
    #[derive(Default)]
    struct Scripted {
        events: std::collections::VecDeque<QueueEvent>,
        accepted: Vec<Tag>,
        writes: Vec<(Tag, Status)>,
        started: bool,
        refuse_start: bool,
        compression: Option<CompressionLevel>,
        address: String,
    }

    impl Transport for Scripted {
        fn add_listening_port(&mut self, address: &str) {
            self.address = address.to_string();
        }
        fn register_service(&mut self, _: &ServiceId) {}
        fn set_compression(&mut self, level: CompressionLevel) {
            self.compression = Some(level);
        }
        fn build_and_start(&mut self) -> Result<(), TransportError> {
            if self.refuse_start {
                return Err(TransportError::PortUnavailable {
                    address: self.address.clone(),
                });
            }
            self.started = true;
            Ok(())
        }
        fn shutdown(&mut self, _: Duration) {
            self.started = false;
        }
        fn shutdown_queue(&mut self) {
            self.events.push_back(QueueEvent::Shutdown);
        }
        fn next(&mut self, _: Duration) -> QueueEvent {
            self.events.pop_front().unwrap_or(QueueEvent::Timeout)
        }
        fn accept(&mut self, _: &ServiceId, _: &MethodId, _: CallKind, tag: Tag) {
            self.accepted.push(tag);
        }
        fn take_request(&mut self, _: Tag) -> Vec<u8> {
            Vec::new()
        }
        fn write_final(&mut self, tag: Tag, _: Vec<u8>, status: Status) {
            self.writes.push((tag, status));
        }
        fn write(&mut self, tag: Tag, _: Vec<u8>) {
            self.writes.push((tag, Status::ok()));
        }
        fn finish(&mut self, tag: Tag, status: Status) {
            self.writes.push((tag, status));
        }
    }

    fn dispatcher() -> Dispatcher<Scripted> {
        let mut d = Dispatcher::new(Scripted::default(), DispatchConfig::default()).unwrap();
        d.register(
            "echo",
            vec![HandlerDescriptor::unary_fn("Echo", |req, r: UnaryResponder| {
                r.ok(req.to_vec())
            })],
        )
        .unwrap();
        d
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = DispatchConfig {
            port: 80,
            ..Default::default()
        };
        assert!(Dispatcher::new(Scripted::default(), config).is_err());
    }

    #[test]
    fn initialize_arms_one_slot_per_method() {
        let mut d = dispatcher();
        assert!(!d.is_initialized());
        d.initialize(10001).unwrap();
        assert!(d.is_initialized());
        assert_eq!(d.port(), Some(10001));
        assert_eq!(d.transport().address, "0.0.0.0:10001");
        assert_eq!(d.transport().compression, Some(CompressionLevel::None));
        assert_eq!(d.spare_slots("echo", "Echo"), 1);
        assert_eq!(d.transport().accepted, vec![Tag(0)]);
        assert_eq!(
            d.initialize(10001),
            Err(DispatchError::AlreadyInitialized)
        );
    }

    #[test]
    fn low_port_is_rejected() {
        let mut d = dispatcher();
        assert_eq!(
            d.initialize(80),
            Err(DispatchError::Config(ConfigError::InvalidPort { port: 80 }))
        );
        assert!(!d.is_initialized());
    }

    #[test]
    fn failed_start_leaves_dispatcher_stopped() {
        let mut d = dispatcher();
        d.transport_mut().refuse_start = true;
        let err = d.initialize(10001).unwrap_err();
        assert!(matches!(err, DispatchError::Transport(_)));
        assert!(!d.is_initialized());
        assert_eq!(d.tick(), TickMetrics::default());
        assert_eq!(d.counters().ticks, 0);
    }

    #[test]
    fn accepted_call_rearms_and_replies() {
        let mut d = dispatcher();
        d.initialize(10001).unwrap();
        d.transport_mut().events.push_back(QueueEvent::GotEvent {
            tag: Tag(0),
            ok: true,
        });
        let m = d.tick();
        assert_eq!(m.calls_accepted, 1);
        assert_eq!(m.final_writes, 1);
        assert_eq!(d.state_of(Tag(0)), Some(RequestState::Finishing));
        assert_eq!(d.state_of(Tag(1)), Some(RequestState::Requested));
        assert_eq!(d.transport().writes, vec![(Tag(0), Status::ok())]);

        d.transport_mut().events.push_back(QueueEvent::GotEvent {
            tag: Tag(0),
            ok: true,
        });
        let m = d.tick();
        assert_eq!(m.calls_finished, 1);
        assert_eq!(d.state_of(Tag(0)), None);
        assert_eq!(d.live_calls(), 1);
    }

    #[test]
    fn unknown_tag_is_dropped() {
        let mut d = dispatcher();
        d.initialize(10001).unwrap();
        d.transport_mut().events.push_back(QueueEvent::GotEvent {
            tag: Tag(77),
            ok: true,
        });
        assert_eq!(d.tick().events_dropped, 1);
        assert_eq!(d.live_calls(), 1);
    }

    #[test]
    fn unexpected_shutdown_ends_the_pass() {
        let mut d = dispatcher();
        d.initialize(10001).unwrap();
        d.transport_mut().events.push_back(QueueEvent::Shutdown);
        d.transport_mut().events.push_back(QueueEvent::GotEvent {
            tag: Tag(0),
            ok: true,
        });
        let m = d.tick();
        assert_eq!(m.polls, 1);
        assert_eq!(m.calls_accepted, 0);
    }

    #[test]
    fn activation_needs_registration() {
        let mut d = dispatcher();
        let err = d.activate_service("nope", &Rc::new(())).unwrap_err();
        assert_eq!(
            err,
            DispatchError::Registry(RegistryError::NotRegistered {
                service: ServiceId::new("nope")
            })
        );
        // Standalone handlers ignore activation, running or not.
        assert_eq!(d.activate_service("echo", &Rc::new(())), Ok(()));
        assert!(d.early.is_empty());
        assert_eq!(d.deactivate_service("echo"), Ok(()));
    }

    #[test]
    fn cancelled_slot_is_not_an_aborted_call() {
        let mut d = dispatcher();
        d.initialize(10001).unwrap();
        d.transport_mut().events.push_back(QueueEvent::GotEvent {
            tag: Tag(0),
            ok: false,
        });
        let m = d.tick();
        assert_eq!(m.slots_cancelled, 1);
        assert_eq!(m.calls_aborted, 0);
        assert_eq!(d.live_calls(), 0);
    }

    #[test]
    fn deinitialize_twice_is_a_noop() {
        let mut d = dispatcher();
        d.initialize(10001).unwrap();
        d.deinitialize();
        assert!(!d.is_initialized());
        assert_eq!(d.live_calls(), 0);
        d.deinitialize();
        assert!(!d.is_initialized());
    }

    #[test]
    fn tags_keep_increasing_across_restarts() {
        let mut d = dispatcher();
        d.initialize(10001).unwrap();
        d.reinitialize().unwrap();
        assert_eq!(d.transport().accepted, vec![Tag(0), Tag(1)]);
        assert_eq!(d.port(), Some(10001));
    }

    #[test]
    fn config_update_restarts_only_for_server_settings() {
        let mut d = dispatcher();
        d.initialize(10001).unwrap();
        d.update_config(DispatchConfig {
            time_mode: TimeMode::FixedStep,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(d.time_mode(), TimeMode::FixedStep);
        assert_eq!(d.transport().accepted.len(), 1);

        d.update_config(DispatchConfig {
            port: 20002,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(d.port(), Some(20002));
        assert_eq!(d.transport().address, "0.0.0.0:20002");
        assert_eq!(d.transport().accepted.len(), 2);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut d = dispatcher();
        let err = d
            .register(
                "echo",
                vec![HandlerDescriptor::unary_fn("Other", |_, r| {
                    r.fail(Status::new(StatusCode::Unimplemented, ""))
                })],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Registry(RegistryError::AlreadyRegistered { .. })
        ));
    }

    #[test]
    fn error_source_is_the_wrapped_error() {
        let e = DispatchError::from(ConfigError::EmptyBindHost);
        assert!(e.source().is_some());
        assert!(e.to_string().starts_with("config: "));
    }
}
