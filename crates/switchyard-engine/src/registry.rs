//! Live service registry: handler descriptors per service and the
//! business-logic instance each service is currently bound to.
//!
//! The registry is built when the dispatcher initializes and dropped
//! when it deinitializes. Binding changes never touch armed transport
//! slots; handlers look the instance up at invocation time.
//!
//! Instances are held through [`Weak`] references. A binding whose
//! instance has been dropped counts as inactive and is skipped when the
//! dispatcher reactivates services after a restart.

use std::any::{type_name, Any, TypeId};
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use switchyard_core::{RegistryError, ServiceId};

use crate::handler::HandlerDescriptor;

struct ServiceRecord {
    descriptors: Vec<Rc<HandlerDescriptor>>,
    active: Option<Weak<dyn Any>>,
}

/// Services, their descriptors, and their active instances.
#[derive(Default)]
pub struct ServiceRegistry {
    services: IndexMap<ServiceId, ServiceRecord>,
}

impl ServiceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a handler list before registration: it must be non-empty
    /// and name each method once.
    pub fn check(
        service: &ServiceId,
        descriptors: &[HandlerDescriptor],
    ) -> Result<(), RegistryError> {
        if descriptors.is_empty() {
            return Err(RegistryError::NoHandlers {
                service: service.clone(),
            });
        }
        let mut seen = HashSet::with_capacity(descriptors.len());
        for d in descriptors {
            if !seen.insert(d.method()) {
                return Err(RegistryError::DuplicateMethod {
                    service: service.clone(),
                    method: d.method().clone(),
                });
            }
        }
        Ok(())
    }

    /// Add a service with no active instance.
    pub(crate) fn insert(
        &mut self,
        service: ServiceId,
        descriptors: Vec<Rc<HandlerDescriptor>>,
    ) -> Result<(), RegistryError> {
        if self.services.contains_key(&service) {
            return Err(RegistryError::AlreadyRegistered { service });
        }
        self.services.insert(
            service,
            ServiceRecord {
                descriptors,
                active: None,
            },
        );
        Ok(())
    }

    /// Bind `instance` as the target of the service's instance-bound
    /// handlers, replacing any previous binding.
    ///
    /// A service with only standalone handlers ignores activation.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotRegistered`] for an unknown service,
    /// [`RegistryError::InstanceTypeMismatch`] if a handler was declared
    /// against a type other than `S`.
    pub fn activate<S: 'static>(
        &mut self,
        service: &ServiceId,
        instance: &Rc<S>,
    ) -> Result<(), RegistryError> {
        let record = self.record_mut(service)?;
        if !Self::binds::<S>(service, &record.descriptors)? {
            tracing::debug!(%service, "service has only standalone handlers, activation ignored");
            return Ok(());
        }

        if let Some(old) = record.active.as_ref().filter(|w| w.strong_count() > 0) {
            if !std::ptr::addr_eq(old.as_ptr(), Rc::as_ptr(instance)) {
                tracing::warn!(%service, "service rebound to a different instance");
            }
        }
        let erased: Rc<dyn Any> = Rc::clone(instance) as Rc<dyn Any>;
        record.active = Some(Rc::downgrade(&erased));
        Ok(())
    }

    /// Whether an instance of `S` would be bound by `descriptors`:
    /// `false` if every handler is standalone.
    ///
    /// # Errors
    ///
    /// [`RegistryError::InstanceTypeMismatch`] if a handler was declared
    /// against a type other than `S`.
    pub(crate) fn binds<S: 'static>(
        service: &ServiceId,
        descriptors: &[Rc<HandlerDescriptor>],
    ) -> Result<bool, RegistryError> {
        let mut bound = false;
        for d in descriptors {
            if let Some((expected, expected_name)) = d.instance_type() {
                if expected != TypeId::of::<S>() {
                    return Err(RegistryError::InstanceTypeMismatch {
                        service: service.clone(),
                        expected: expected_name,
                        found: type_name::<S>(),
                    });
                }
                bound = true;
            }
        }
        Ok(bound)
    }

    /// Restore a binding captured by [`active_bindings()`](Self::active_bindings).
    ///
    /// Returns `false` if the service is gone or the instance was dropped.
    pub(crate) fn rebind(&mut self, service: &ServiceId, instance: Weak<dyn Any>) -> bool {
        match self.services.get_mut(service) {
            Some(record) if instance.strong_count() > 0 => {
                record.active = Some(instance);
                true
            }
            _ => false,
        }
    }

    /// Unbind the service's instance. Returns whether one was bound.
    pub fn deactivate(&mut self, service: &ServiceId) -> Result<bool, RegistryError> {
        let record = self.record_mut(service)?;
        Ok(record.active.take().is_some())
    }

    /// The live instance bound to the service, if any.
    pub fn active_instance(&self, service: &ServiceId) -> Option<Rc<dyn Any>> {
        self.services
            .get(service)
            .and_then(|r| r.active.as_ref())
            .and_then(Weak::upgrade)
    }

    /// Whether the service has a live bound instance.
    pub fn is_active(&self, service: &ServiceId) -> bool {
        self.active_instance(service).is_some()
    }

    /// Every binding whose instance is still alive, in registration order.
    pub fn active_bindings(&self) -> Vec<(ServiceId, Weak<dyn Any>)> {
        self.services
            .iter()
            .filter_map(|(id, r)| {
                r.active
                    .as_ref()
                    .filter(|w| w.strong_count() > 0)
                    .map(|w| (id.clone(), w.clone()))
            })
            .collect()
    }

    /// Whether the service is registered.
    pub fn contains(&self, service: &ServiceId) -> bool {
        self.services.contains_key(service)
    }

    /// Registered services, in registration order.
    pub fn services(&self) -> impl Iterator<Item = &ServiceId> {
        self.services.keys()
    }

    /// The service's handler descriptors.
    pub fn descriptors(&self, service: &ServiceId) -> Option<&[Rc<HandlerDescriptor>]> {
        self.services.get(service).map(|r| r.descriptors.as_slice())
    }

    fn record_mut(&mut self, service: &ServiceId) -> Result<&mut ServiceRecord, RegistryError> {
        self.services
            .get_mut(service)
            .ok_or_else(|| RegistryError::NotRegistered {
                service: service.clone(),
            })
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut m = f.debug_map();
        for (id, r) in &self.services {
            m.entry(id, &(r.descriptors.len(), self.is_active(id)));
        }
        m.finish()
    }
}
