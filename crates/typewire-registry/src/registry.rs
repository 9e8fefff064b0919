use std::any::TypeId as RustTypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info, trace};
use typewire_frame::{Envelope, Message, TypeId, TypeResolver, TypeVersion};

use crate::command::SystemCommand;
use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::manifest::{Manifest, ManifestEntry};

/// Fixed id of the manifest control type on every build.
pub const MANIFEST_TYPE_ID: TypeId = 0;
/// Fixed id of the system command control type on every build.
pub const SYSTEM_COMMAND_TYPE_ID: TypeId = 1;
/// First id handed out by [`TypeRegistry::register`].
pub const FIRST_USER_TYPE_ID: TypeId = 2;
/// Translation-table value for "no local type".
pub const INVALID_TYPE_ID: TypeId = u8::MAX;
/// Maximum number of descriptors, reserved types included.
pub const MAX_TYPES: usize = INVALID_TYPE_ID as usize;

pub const MANIFEST_TYPE_NAME: &str = "ManifestData";
pub const SYSTEM_COMMAND_TYPE_NAME: &str = "SystemCmdData";

type Factory = fn() -> Box<dyn Message>;

fn make<T: Message + Default>() -> Box<dyn Message> {
    Box::<T>::default()
}

/// Public view of one registered type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeDescriptor {
    pub id: TypeId,
    pub version: TypeVersion,
    pub name: String,
    /// Confirmed to exist on the peer (or a reserved type).
    pub enabled: bool,
}

struct Slot {
    version: TypeVersion,
    name: String,
    rust_type: RustTypeId,
    factory: Factory,
    enabled: bool,
}

struct State {
    slots: Vec<Slot>,
    by_rust_type: HashMap<RustTypeId, TypeId>,
    /// foreign id -> local id
    type_map: [TypeId; 256],
}

impl State {
    fn new() -> Self {
        let mut state = Self {
            slots: Vec::new(),
            by_rust_type: HashMap::new(),
            type_map: [INVALID_TYPE_ID; 256],
        };
        state.install_reserved();
        state
    }

    fn install_reserved(&mut self) {
        self.push::<Manifest>(MANIFEST_TYPE_NAME.to_string(), 0);
        self.push::<SystemCommand>(SYSTEM_COMMAND_TYPE_NAME.to_string(), 0);
        self.accept(MANIFEST_TYPE_ID, MANIFEST_TYPE_ID);
        self.accept(SYSTEM_COMMAND_TYPE_ID, SYSTEM_COMMAND_TYPE_ID);
    }

    fn push<T: Message + Default>(&mut self, name: String, version: TypeVersion) -> TypeId {
        let id = self.slots.len() as TypeId;
        let rust_type = RustTypeId::of::<T>();
        self.slots.push(Slot {
            version,
            name,
            rust_type,
            factory: make::<T>,
            enabled: false,
        });
        self.by_rust_type.insert(rust_type, id);
        id
    }

    fn slot(&self, id: TypeId) -> Option<&Slot> {
        self.slots.get(id as usize)
    }

    fn own_enabled(&self, id: TypeId) -> bool {
        self.slot(id).is_some_and(|slot| slot.enabled)
    }

    fn find(&self, name: &str, version: TypeVersion) -> Option<TypeId> {
        self.slots
            .iter()
            .position(|slot| slot.name == name && slot.version == version)
            .map(|index| index as TypeId)
    }

    fn accept(&mut self, own: TypeId, foreign: TypeId) -> bool {
        let Some(slot) = self.slots.get_mut(own as usize) else {
            return false;
        };
        slot.enabled = true;
        self.type_map[foreign as usize] = own;
        true
    }

    fn translate(&self, foreign: TypeId) -> Option<TypeId> {
        match self.type_map[foreign as usize] {
            INVALID_TYPE_ID => None,
            own => Some(own),
        }
    }

    fn forget_negotiation(&mut self) {
        self.type_map = [INVALID_TYPE_ID; 256];
        for slot in &mut self.slots {
            slot.enabled = false;
        }
        self.accept(MANIFEST_TYPE_ID, MANIFEST_TYPE_ID);
        self.accept(SYSTEM_COMMAND_TYPE_ID, SYSTEM_COMMAND_TYPE_ID);
    }
}

/// Directory of locally known message types and the foreign-to-local id
/// translation built during manifest negotiation.
///
/// Ids 0 and 1 always belong to [`Manifest`] and [`SystemCommand`] and are
/// enabled from the start; user types get sequential ids from 2 in
/// registration order and stay disabled until the peer's manifest (or
/// [`accept_identity`](Self::accept_identity)) enables them.
///
/// All methods take `&self`; share the registry between pipeline threads
/// with an `Arc`.
pub struct TypeRegistry {
    state: Mutex<State>,
    manifest_received: AtomicBool,
    config: RegistryConfig,
}

impl TypeRegistry {
    /// An empty registry holding only the two reserved control types.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            state: Mutex::new(State::new()),
            manifest_received: AtomicBool::new(false),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `T` under `(name, version)` and return its local id.
    ///
    /// The type starts disabled.
    pub fn register<T: Message + Default>(
        &self,
        name: impl Into<String>,
        version: TypeVersion,
    ) -> Result<TypeId> {
        let name = name.into();
        let mut state = self.lock();

        if let Some(existing) = state.by_rust_type.get(&RustTypeId::of::<T>()) {
            let name = state
                .slot(*existing)
                .map(|slot| slot.name.clone())
                .unwrap_or_default();
            return Err(RegistryError::DuplicateType { name });
        }
        if state.find(&name, version).is_some() {
            return Err(RegistryError::DuplicateName { name, version });
        }
        let max = self.config.capacity();
        if state.slots.len() >= max {
            return Err(RegistryError::Exhausted { max });
        }

        let id = state.push::<T>(name, version);
        debug!(type_id = id, name = %state.slots[id as usize].name, version, "type registered");
        Ok(id)
    }

    /// Local id of `T`, if registered.
    pub fn id_of<T: Message>(&self) -> Option<TypeId> {
        self.lock().by_rust_type.get(&RustTypeId::of::<T>()).copied()
    }

    /// Local id of the concrete type behind `message`, if registered.
    pub fn id_of_message(&self, message: &dyn Message) -> Option<TypeId> {
        let rust_type = message.as_any().type_id();
        self.lock().by_rust_type.get(&rust_type).copied()
    }

    /// Whether `envelope` carries a `T`, judged by its local id.
    pub fn is_type<T: Message>(&self, envelope: &Envelope) -> bool {
        self.id_of::<T>() == Some(envelope.id())
    }

    /// Local id registered for `(name, version)`.
    pub fn find_type_id(&self, name: &str, version: TypeVersion) -> Option<TypeId> {
        self.lock().find(name, version)
    }

    /// Whether the local type `id` may be sent.
    pub fn is_own_enabled(&self, id: TypeId) -> bool {
        self.lock().own_enabled(id)
    }

    /// Whether the foreign type `foreign` maps to an enabled local type.
    pub fn is_foreign_enabled(&self, foreign: TypeId) -> bool {
        let state = self.lock();
        state
            .translate(foreign)
            .is_some_and(|own| state.own_enabled(own))
    }

    /// Local id for `foreign`, if the peer's manifest mapped it.
    pub fn translate(&self, foreign: TypeId) -> Option<TypeId> {
        self.lock().translate(foreign)
    }

    /// Fresh default instance of the local type `id`, if enabled.
    pub fn instantiate_own(&self, id: TypeId) -> Option<Box<dyn Message>> {
        let state = self.lock();
        let slot = state.slot(id).filter(|slot| slot.enabled)?;
        Some((slot.factory)())
    }

    /// Fresh default instance for `foreign`, with its local id.
    pub fn instantiate_foreign(&self, foreign: TypeId) -> Option<(TypeId, Box<dyn Message>)> {
        let state = self.lock();
        let own = state.translate(foreign)?;
        let slot = state.slot(own).filter(|slot| slot.enabled)?;
        Some((own, (slot.factory)()))
    }

    /// Snapshot of every registered descriptor, reserved types included.
    pub fn extract_manifest(&self) -> Manifest {
        let state = self.lock();
        let entries = state
            .slots
            .iter()
            .enumerate()
            .map(|(index, slot)| ManifestEntry {
                id: index as TypeId,
                version: slot.version,
                name: slot.name.clone(),
            })
            .collect();
        Manifest::new(entries)
    }

    /// Absorb a peer manifest.
    ///
    /// Every record whose name and version match a local type maps the
    /// record's id to that type and enables it. Applying the same manifest
    /// again changes nothing. Marks the manifest as received unless the
    /// manifest is empty. Returns the number of matched records.
    pub fn apply_manifest(&self, manifest: &Manifest) -> usize {
        let mut matched = 0usize;
        {
            let mut state = self.lock();
            for entry in manifest.iter() {
                match state.find(&entry.name, entry.version) {
                    Some(own) => {
                        state.accept(own, entry.id);
                        matched += 1;
                        trace!(
                            type_id = own,
                            foreign_id = entry.id,
                            name = %entry.name,
                            version = entry.version,
                            "type accepted"
                        );
                    }
                    None => trace!(
                        foreign_id = entry.id,
                        name = %entry.name,
                        version = entry.version,
                        "peer type unknown locally"
                    ),
                }
            }
        }
        if !manifest.is_empty() {
            let first = !self.manifest_received.swap(true, Ordering::AcqRel);
            if first {
                info!(records = manifest.len(), matched, "peer manifest received");
            } else {
                debug!(records = manifest.len(), matched, "peer manifest re-applied");
            }
        }
        matched
    }

    /// Map `foreign` to the local type `own` and enable it.
    ///
    /// Returns `false` if `own` is not registered.
    pub fn accept_type(&self, own: TypeId, foreign: TypeId) -> bool {
        self.lock().accept(own, foreign)
    }

    /// Skip negotiation: map every local id to itself and enable every type.
    ///
    /// Only correct when both endpoints register the same types in the same
    /// order.
    pub fn accept_identity(&self) {
        {
            let mut state = self.lock();
            for id in 0..state.slots.len() {
                state.accept(id as TypeId, id as TypeId);
            }
        }
        self.manifest_received.store(true, Ordering::Release);
        debug!("identity mapping accepted for all types");
    }

    pub fn is_manifest_received(&self) -> bool {
        self.manifest_received.load(Ordering::Acquire)
    }

    pub fn set_manifest_received(&self, received: bool) {
        self.manifest_received.store(received, Ordering::Release);
    }

    /// Drop every negotiated mapping but keep registrations.
    pub fn renegotiate(&self) {
        self.lock().forget_negotiation();
        self.manifest_received.store(false, Ordering::Release);
        debug!("negotiation state cleared");
    }

    /// Remove every user registration and all negotiation state.
    pub fn reset(&self) {
        *self.lock() = State::new();
        self.manifest_received.store(false, Ordering::Release);
        debug!("registry reset");
    }

    /// Snapshot of all descriptors in id order.
    pub fn descriptors(&self) -> Vec<TypeDescriptor> {
        let state = self.lock();
        state
            .slots
            .iter()
            .enumerate()
            .map(|(index, slot)| TypeDescriptor {
                id: index as TypeId,
                version: slot.version,
                name: slot.name.clone(),
                enabled: slot.enabled,
            })
            .collect()
    }

    /// Number of registered types, reserved types included.
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeResolver for TypeRegistry {
    fn is_foreign_enabled(&self, foreign: TypeId) -> bool {
        TypeRegistry::is_foreign_enabled(self, foreign)
    }

    fn instantiate_foreign(&self, foreign: TypeId) -> Option<(TypeId, Box<dyn Message>)> {
        TypeRegistry::instantiate_foreign(self, foreign)
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.len())
            .field("manifest_received", &self.is_manifest_received())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use typewire_frame::{WireReader, WireWriter};

    use super::*;
    use crate::command::Command;

    #[derive(Debug, Default, PartialEq)]
    struct Alpha(u32);

    #[derive(Debug, Default, PartialEq)]
    struct Beta(u32);

    #[derive(Debug, Default, PartialEq)]
    struct Gamma(u32);

    macro_rules! u32_message {
        ($ty:ident) => {
            impl Message for $ty {
                fn write(&self, out: &mut WireWriter<'_>) -> typewire_frame::Result<()> {
                    out.write_u32(self.0);
                    Ok(())
                }

                fn read(&mut self, input: &mut WireReader<'_>) -> typewire_frame::Result<()> {
                    self.0 = input.read_u32()?;
                    Ok(())
                }
            }
        };
    }

    u32_message!(Alpha);
    u32_message!(Beta);
    u32_message!(Gamma);

    #[test]
    fn reserved_types_are_present_and_enabled() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.id_of::<Manifest>(), Some(MANIFEST_TYPE_ID));
        assert_eq!(registry.id_of::<SystemCommand>(), Some(SYSTEM_COMMAND_TYPE_ID));
        assert!(registry.is_own_enabled(MANIFEST_TYPE_ID));
        assert!(registry.is_foreign_enabled(SYSTEM_COMMAND_TYPE_ID));
        assert!(!registry.is_manifest_received());
    }

    #[test]
    fn user_types_get_sequential_ids_and_start_disabled() {
        let registry = TypeRegistry::new();
        assert_eq!(registry.register::<Alpha>("Alpha", 1).unwrap(), 2);
        assert_eq!(registry.register::<Beta>("Beta", 1).unwrap(), 3);
        assert!(!registry.is_own_enabled(2));
        assert!(registry.instantiate_own(2).is_none());
        assert_eq!(registry.find_type_id("Beta", 1), Some(3));
        assert_eq!(registry.find_type_id("Beta", 2), None);
        assert_eq!(registry.id_of_message(&Beta(1)), Some(3));
    }

    #[test]
    fn duplicates_are_rejected() {
        let registry = TypeRegistry::new();
        registry.register::<Alpha>("Alpha", 1).unwrap();
        assert!(matches!(
            registry.register::<Alpha>("Other", 1),
            Err(RegistryError::DuplicateType { .. })
        ));
        assert!(matches!(
            registry.register::<Beta>("Alpha", 1),
            Err(RegistryError::DuplicateName { .. })
        ));
        assert!(matches!(
            registry.register::<Beta>(MANIFEST_TYPE_NAME, 0),
            Err(RegistryError::DuplicateName { .. })
        ));
        registry.register::<Beta>("Alpha", 2).unwrap();
    }

    #[test]
    fn id_space_exhaustion() {
        let registry = TypeRegistry::with_config(RegistryConfig { max_types: 3 });
        registry.register::<Alpha>("Alpha", 1).unwrap();
        assert!(matches!(
            registry.register::<Beta>("Beta", 1),
            Err(RegistryError::Exhausted { max: 3 })
        ));
    }

    #[test]
    fn capacity_is_clamped_below_sentinel() {
        let config = RegistryConfig { max_types: 1000 };
        assert_eq!(config.capacity(), MAX_TYPES);
        assert_eq!(MAX_TYPES, 255);
    }

    #[test]
    fn manifest_lists_every_descriptor() {
        let registry = TypeRegistry::new();
        registry.register::<Alpha>("Alpha", 4).unwrap();
        let manifest = registry.extract_manifest();
        let names: Vec<_> = manifest.iter().map(|e| (e.id, e.name.as_str(), e.version)).collect();
        assert_eq!(
            names,
            vec![
                (0, MANIFEST_TYPE_NAME, 0),
                (1, SYSTEM_COMMAND_TYPE_NAME, 0),
                (2, "Alpha", 4)
            ]
        );
    }

    #[test]
    fn negotiation_converges_with_different_id_assignments() {
        let a = TypeRegistry::new();
        a.register::<Alpha>("Alpha", 1).unwrap();
        a.register::<Beta>("Beta", 1).unwrap();

        let b = TypeRegistry::new();
        b.register::<Gamma>("Gamma", 1).unwrap();
        b.register::<Beta>("Beta", 1).unwrap();

        a.apply_manifest(&b.extract_manifest());
        b.apply_manifest(&a.extract_manifest());

        let a_beta = a.id_of::<Beta>().unwrap();
        let b_beta = b.id_of::<Beta>().unwrap();
        assert_ne!(a_beta, b_beta);
        assert!(a.is_own_enabled(a_beta));
        assert!(b.is_own_enabled(b_beta));
        assert_eq!(a.translate(b_beta), Some(a_beta));
        assert_eq!(b.translate(a_beta), Some(b_beta));

        // unmatched types never become enabled
        assert!(!a.is_own_enabled(a.id_of::<Alpha>().unwrap()));
        assert!(!b.is_own_enabled(b.id_of::<Gamma>().unwrap()));
        assert!(a.is_manifest_received());
        assert!(b.is_manifest_received());
    }

    #[test]
    fn apply_manifest_is_idempotent() {
        let a = TypeRegistry::new();
        a.register::<Alpha>("Alpha", 1).unwrap();
        let peer = a.extract_manifest();

        assert_eq!(a.apply_manifest(&peer), 3);
        let before = a.descriptors();
        assert_eq!(a.apply_manifest(&peer), 3);
        assert_eq!(a.descriptors(), before);
    }

    #[test]
    fn version_mismatch_does_not_enable() {
        let a = TypeRegistry::new();
        a.register::<Alpha>("Alpha", 1).unwrap();
        let peer = Manifest::new(vec![ManifestEntry {
            id: 9,
            version: 2,
            name: "Alpha".to_string(),
        }]);
        assert_eq!(a.apply_manifest(&peer), 0);
        assert!(!a.is_foreign_enabled(9));
        assert!(a.is_manifest_received());
    }

    #[test]
    fn empty_manifest_does_not_mark_received() {
        let a = TypeRegistry::new();
        a.apply_manifest(&Manifest::default());
        assert!(!a.is_manifest_received());
    }

    #[test]
    fn foreign_instantiation_uses_local_factory() {
        let a = TypeRegistry::new();
        let own = a.register::<Alpha>("Alpha", 1).unwrap();
        assert!(a.instantiate_foreign(40).is_none());
        assert!(a.accept_type(own, 40));

        let (local, body) = a.instantiate_foreign(40).unwrap();
        assert_eq!(local, own);
        assert!((*body).as_any().is::<Alpha>());
        assert!(!a.accept_type(77, 41));
    }

    #[test]
    fn identity_acceptance_enables_everything() {
        let a = TypeRegistry::new();
        a.register::<Alpha>("Alpha", 1).unwrap();
        a.accept_identity();
        assert!(a.is_own_enabled(2));
        assert_eq!(a.translate(2), Some(2));
        assert!(a.is_manifest_received());
    }

    #[test]
    fn renegotiate_keeps_types_and_drops_mappings() {
        let a = TypeRegistry::new();
        a.register::<Alpha>("Alpha", 1).unwrap();
        a.accept_identity();

        a.renegotiate();
        assert_eq!(a.len(), 3);
        assert!(!a.is_own_enabled(2));
        assert_eq!(a.translate(2), None);
        assert!(a.is_own_enabled(MANIFEST_TYPE_ID));
        assert!(!a.is_manifest_received());
    }

    #[test]
    fn reset_removes_user_types() {
        let a = TypeRegistry::new();
        a.register::<Alpha>("Alpha", 1).unwrap();
        a.reset();
        assert_eq!(a.len(), 2);
        assert_eq!(a.id_of::<Alpha>(), None);
        assert_eq!(a.register::<Beta>("Beta", 1).unwrap(), FIRST_USER_TYPE_ID);
    }

    #[test]
    fn is_type_checks_local_id() {
        let a = TypeRegistry::new();
        a.accept_identity();
        let env = Envelope::new(
            SYSTEM_COMMAND_TYPE_ID,
            Box::new(SystemCommand::new(Command::ManifestRequest)),
        );
        assert!(a.is_type::<SystemCommand>(&env));
        assert!(!a.is_type::<Manifest>(&env));
    }
}
