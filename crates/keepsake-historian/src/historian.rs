//! The historian façade.
//!
//! One [`Historian`] owns an archive handle, a type registry, and the
//! identity map of live objects. Every save and load goes through a
//! [`Transaction`] so a whole object graph lands in the archive atomically,
//! and so two loads of the same object id hand back the same instance.
//!
//! There is deliberately no process-global historian: callers construct one
//! and pass it where it is needed.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use keepsake_archive::{Archive, InMemoryArchive, Query};
use keepsake_record::{DataRecord, RecordBuilder};
use keepsake_types::{ObjectId, SnapshotRef, Value};
use tracing::{debug, info};

use crate::depositor::Depositor;
use crate::error::{HistorianError, Result};
use crate::handle::{downcast, erase, instance_key, AnyObj, Obj};
use crate::helper::Helper;
use crate::loader::{LoadMode, ObjectLoader};
use crate::migration::upgrade_state;
use crate::registry::TypeRegistry;
use crate::transaction::{LiveObjects, Transaction};

/// Saves, loads, deletes, and migrates versioned objects.
pub struct Historian {
    archive: Arc<dyn Archive>,
    registry: TypeRegistry,
    live: RwLock<LiveObjects>,
    session: ObjectId,
}

impl Historian {
    /// A historian over the given archive.
    pub fn new(archive: Arc<dyn Archive>) -> Self {
        Self {
            archive,
            registry: TypeRegistry::new(),
            live: RwLock::new(LiveObjects::default()),
            session: ObjectId::new(),
        }
    }

    /// A historian over a fresh in-memory archive.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryArchive::new()))
    }

    /// The identifier of this historian session. Every object first saved
    /// through this historian carries it in the
    /// [`extras::CREATED_BY`](keepsake_record::extras::CREATED_BY) extra.
    pub fn session_id(&self) -> ObjectId {
        self.session
    }

    fn created_by(&self) -> Value {
        Value::from(self.session.to_string())
    }

    /// Register a helper so its type can be saved and loaded.
    pub fn register_helper<H: Helper>(&self, helper: H) -> Result<()> {
        self.registry.register(helper)
    }

    /// Save an object (and, transitively, everything it references) as one
    /// atomic transaction. Returns the reference the object answers to;
    /// unchanged objects keep their existing reference and write nothing.
    pub fn save<T: Send + Sync + 'static>(&self, object: &Obj<T>) -> Result<SnapshotRef> {
        self.save_erased(erase(object))
    }

    /// Save several roots in one transaction.
    pub fn save_many<T: Send + Sync + 'static>(
        &self,
        objects: &[Obj<T>],
    ) -> Result<Vec<SnapshotRef>> {
        let mut live = self.live_write()?;
        let mut txn = Transaction::new();
        let mut depositor = Depositor::new(
            &self.registry,
            self.archive.as_ref(),
            &live,
            &mut txn,
            self.created_by(),
        );
        let mut snapshots = Vec::with_capacity(objects.len());
        for object in objects {
            snapshots.push(depositor.save_object(erase(object))?);
        }
        drop(depositor);
        txn.commit(self.archive.as_ref(), &mut live)?;
        Ok(snapshots)
    }

    /// Type-erased form of [`save`](Self::save).
    pub fn save_erased(&self, object: AnyObj) -> Result<SnapshotRef> {
        let mut live = self.live_write()?;
        let mut txn = Transaction::new();
        let mut depositor = Depositor::new(
            &self.registry,
            self.archive.as_ref(),
            &live,
            &mut txn,
            self.created_by(),
        );
        let snapshot = depositor.save_object(object)?;
        drop(depositor);
        txn.commit(self.archive.as_ref(), &mut live)?;
        Ok(snapshot)
    }

    /// Load the latest version of an object.
    ///
    /// If this historian already tracks an instance for the id, that exact
    /// instance is returned, unchanged; pending in-memory edits win until
    /// the next save.
    pub fn load<T: Send + Sync + 'static>(&self, object_id: ObjectId) -> Result<Obj<T>> {
        let mut live = self.live_write()?;
        let mut txn = Transaction::new();
        let mut loader = ObjectLoader::new(
            &self.registry,
            self.archive.as_ref(),
            &live,
            &mut txn,
            LoadMode::Live,
        );
        let any = loader.load_latest(object_id)?;
        drop(loader);
        txn.commit(self.archive.as_ref(), &mut live)?;
        Self::typed::<T>(any)
    }

    /// Load several objects in one walk, sharing referents between them.
    pub fn load_many<T: Send + Sync + 'static>(
        &self,
        object_ids: &[ObjectId],
    ) -> Result<Vec<Obj<T>>> {
        let mut live = self.live_write()?;
        let mut txn = Transaction::new();
        let mut loader = ObjectLoader::new(
            &self.registry,
            self.archive.as_ref(),
            &live,
            &mut txn,
            LoadMode::Live,
        );
        let mut anys = Vec::with_capacity(object_ids.len());
        for &object_id in object_ids {
            anys.push(loader.load_latest(object_id)?);
        }
        drop(loader);
        txn.commit(self.archive.as_ref(), &mut live)?;
        anys.into_iter().map(Self::typed::<T>).collect()
    }

    /// Load one pinned historical snapshot.
    ///
    /// The result is detached: a fresh instance outside the identity map,
    /// with every reference resolved at its recorded version. Saving it
    /// again is not supported; copy its state into a live object instead.
    pub fn load_snapshot<T: Send + Sync + 'static>(
        &self,
        snapshot: SnapshotRef,
    ) -> Result<Obj<T>> {
        let live = self.live_read()?;
        let mut txn = Transaction::new();
        let mut loader = ObjectLoader::new(
            &self.registry,
            self.archive.as_ref(),
            &live,
            &mut txn,
            LoadMode::Snapshot,
        );
        let any = loader.load_pinned(snapshot)?;
        Self::typed::<T>(any)
    }

    /// Every record of an object, ascending by version.
    pub fn get_history(&self, object_id: ObjectId) -> Result<Vec<DataRecord>> {
        Ok(self.archive.history(object_id)?)
    }

    /// Load the latest live objects of type `T` matching a query.
    ///
    /// The query's type filter is forced to `T`'s type id.
    pub fn find<T: Send + Sync + 'static>(&self, query: Query) -> Result<Vec<Obj<T>>> {
        let helper = self.registry.resolve::<T>()?;
        let records = self.archive.query(&query.with_type(helper.type_id()))?;
        debug!(hits = records.len(), type_id = %helper.type_id(), "query matched");

        let mut live = self.live_write()?;
        let mut txn = Transaction::new();
        let mut loader = ObjectLoader::new(
            &self.registry,
            self.archive.as_ref(),
            &live,
            &mut txn,
            LoadMode::Live,
        );
        let mut anys = Vec::with_capacity(records.len());
        for record in &records {
            anys.push(loader.load_latest(record.object_id)?);
        }
        drop(loader);
        txn.commit(self.archive.as_ref(), &mut live)?;
        anys.into_iter().map(Self::typed::<T>).collect()
    }

    /// Latest records matching a query, without instantiating objects.
    pub fn find_records(&self, query: &Query) -> Result<Vec<DataRecord>> {
        Ok(self.archive.query(query)?)
    }

    /// Delete a tracked object: append the terminal tombstone and stop
    /// tracking the instance. Returns the tombstone's reference.
    pub fn delete<T: Send + Sync + 'static>(&self, object: &Obj<T>) -> Result<SnapshotRef> {
        let mut live = self.live_write()?;
        let key = instance_key(&erase(object));
        let record = live
            .record_for_key(key)
            .ok_or(HistorianError::NotTracked)?
            .clone();
        let tombstone = RecordBuilder::deleted_child_of(&record).build();
        let snapshot = tombstone.snapshot_ref();
        debug!(%snapshot, "appending tombstone");
        self.archive.insert(tombstone)?;
        live.remove(record.object_id);
        Ok(snapshot)
    }

    /// The reference a tracked instance answers to.
    pub fn snapshot_ref_of<T: Send + Sync + 'static>(
        &self,
        object: &Obj<T>,
    ) -> Result<SnapshotRef> {
        Ok(self.record_of(object)?.snapshot_ref())
    }

    /// The latest known record of a tracked instance.
    pub fn record_of<T: Send + Sync + 'static>(&self, object: &Obj<T>) -> Result<DataRecord> {
        let live = self.live_read()?;
        live.record_for_key(instance_key(&erase(object)))
            .cloned()
            .ok_or(HistorianError::NotTracked)
    }

    /// Stop tracking an object id without touching the archive. The next
    /// load fetches fresh from storage. Returns whether it was tracked.
    pub fn forget(&self, object_id: ObjectId) -> Result<bool> {
        Ok(self.live_write()?.remove(object_id))
    }

    /// Rewrite every stored record of type `T` whose state lags the
    /// helper's current schema version. Returns the references rewritten.
    ///
    /// Tombstoned objects are left as they are.
    pub fn migrate_stored<T: Send + Sync + 'static>(&self) -> Result<Vec<SnapshotRef>> {
        let helper = self.registry.resolve::<T>()?;
        let current = helper.schema_version();
        let heads = self.archive.query(&Query::new().with_type(helper.type_id()))?;
        let live = self.live_read()?;

        let mut rewritten = Vec::new();
        for head in heads {
            for record in self.archive.history(head.object_id)? {
                if record.is_deleted() || record.state_schema_version >= current {
                    continue;
                }
                let snapshot = record.snapshot_ref();
                let state = record
                    .state_value()
                    .ok_or_else(|| {
                        HistorianError::decoding(snapshot.to_string(), "record has no state")
                    })?
                    .clone();
                let mut txn = Transaction::new();
                let mut loader = ObjectLoader::new(
                    &self.registry,
                    self.archive.as_ref(),
                    &live,
                    &mut txn,
                    LoadMode::Snapshot,
                );
                let upgraded =
                    upgrade_state(helper.as_ref(), record.state_schema_version, state, &mut loader)?;
                drop(loader);
                self.archive.rewrite_state(snapshot, upgraded, current)?;
                info!(%snapshot, from = record.state_schema_version, to = current, "rewrote stored state");
                rewritten.push(snapshot);
            }
        }
        Ok(rewritten)
    }

    fn typed<T: Send + Sync + 'static>(any: AnyObj) -> Result<Obj<T>> {
        downcast::<T>(&any).ok_or_else(|| HistorianError::TypeMismatch {
            expected: std::any::type_name::<T>().to_string(),
        })
    }

    fn live_read(&self) -> Result<RwLockReadGuard<'_, LiveObjects>> {
        self.live
            .read()
            .map_err(|_| HistorianError::Poisoned("live objects".into()))
    }

    fn live_write(&self) -> Result<RwLockWriteGuard<'_, LiveObjects>> {
        self.live
            .write()
            .map_err(|_| HistorianError::Poisoned("live objects".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use keepsake_record::extras;
    use keepsake_types::{StateHasher, TypeId, Value};

    use crate::handle::new_obj;
    use crate::helper::{Loader, Saver};
    use crate::migration::{Migration, MigrationContext};

    // -- fixture types ----------------------------------------------------

    #[derive(Clone, Debug, Default, PartialEq)]
    struct Car {
        colour: String,
        make: String,
    }

    struct CarHelper;

    impl Helper for CarHelper {
        type Object = Car;

        fn type_id(&self) -> TypeId {
            TypeId::new("garage.car")
        }

        fn encode(&self, car: &Car, _saver: &mut dyn Saver) -> Result<Value> {
            Ok(Value::map([
                ("colour", Value::from(car.colour.as_str())),
                ("make", Value::from(car.make.as_str())),
            ]))
        }

        fn blank(&self) -> Car {
            Car::default()
        }

        fn restore(&self, car: &mut Car, state: &Value, _loader: &mut dyn Loader) -> Result<()> {
            car.colour = text(state, "colour")?;
            car.make = text(state, "make")?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Person {
        name: String,
        car: Option<Obj<Car>>,
    }

    struct PersonHelper;

    impl Helper for PersonHelper {
        type Object = Person;

        fn type_id(&self) -> TypeId {
            TypeId::new("garage.person")
        }

        fn encode(&self, person: &Person, saver: &mut dyn Saver) -> Result<Value> {
            let car = match &person.car {
                Some(car) => Value::Ref(saver.save_ref(car)?),
                None => Value::Null,
            };
            Ok(Value::map([
                ("name", Value::from(person.name.as_str())),
                ("car", car),
            ]))
        }

        fn blank(&self) -> Person {
            Person::default()
        }

        fn restore(
            &self,
            person: &mut Person,
            state: &Value,
            loader: &mut dyn Loader,
        ) -> Result<()> {
            person.name = text(state, "name")?;
            person.car = match state.get("car").and_then(Value::as_snapshot_ref) {
                Some(snapshot) => Some(loader.load_ref(snapshot)?),
                None => None,
            };
            Ok(())
        }
    }

    #[derive(Default)]
    struct Node {
        name: String,
        next: Option<Obj<Node>>,
    }

    struct NodeHelper;

    impl Helper for NodeHelper {
        type Object = Node;

        fn type_id(&self) -> TypeId {
            TypeId::new("graph.node")
        }

        fn encode(&self, node: &Node, saver: &mut dyn Saver) -> Result<Value> {
            let next = match &node.next {
                Some(next) => Value::Ref(saver.save_ref(next)?),
                None => Value::Null,
            };
            Ok(Value::map([
                ("name", Value::from(node.name.as_str())),
                ("next", next),
            ]))
        }

        fn blank(&self) -> Node {
            Node::default()
        }

        fn restore(&self, node: &mut Node, state: &Value, loader: &mut dyn Loader) -> Result<()> {
            node.name = text(state, "name")?;
            node.next = match state.get("next").and_then(Value::as_snapshot_ref) {
                Some(snapshot) => Some(loader.load_ref(snapshot)?),
                None => None,
            };
            Ok(())
        }
    }

    // An engine stored by value inside its boat: no record of its own.
    #[derive(Clone, Debug, Default, PartialEq)]
    struct Engine {
        power: i64,
    }

    struct EngineHelper;

    impl Helper for EngineHelper {
        type Object = Engine;

        fn type_id(&self) -> TypeId {
            TypeId::new("garage.engine")
        }

        fn encode(&self, engine: &Engine, _saver: &mut dyn Saver) -> Result<Value> {
            Ok(Value::map([("power", Value::from(engine.power))]))
        }

        fn blank(&self) -> Engine {
            Engine::default()
        }

        fn restore(
            &self,
            engine: &mut Engine,
            state: &Value,
            _loader: &mut dyn Loader,
        ) -> Result<()> {
            engine.power = state
                .get("power")
                .and_then(Value::as_int)
                .ok_or_else(|| HistorianError::decoding("power", "missing"))?;
            Ok(())
        }
    }

    struct Boat {
        engine: Obj<Engine>,
    }

    struct BoatHelper;

    impl Helper for BoatHelper {
        type Object = Boat;

        fn type_id(&self) -> TypeId {
            TypeId::new("garage.boat")
        }

        fn encode(&self, boat: &Boat, saver: &mut dyn Saver) -> Result<Value> {
            Ok(Value::map([("engine", saver.encode_obj_value(&boat.engine)?)]))
        }

        fn blank(&self) -> Boat {
            Boat {
                engine: new_obj(Engine::default()),
            }
        }

        fn restore(&self, boat: &mut Boat, state: &Value, loader: &mut dyn Loader) -> Result<()> {
            let engine = state
                .get("engine")
                .ok_or_else(|| HistorianError::decoding("engine", "missing"))?;
            boat.engine = loader.decode_obj_value(engine)?;
            Ok(())
        }
    }

    // A node embedding its successor by value; cyclic graphs of these must
    // be rejected.
    #[derive(Default)]
    struct VNode {
        next: Option<Obj<VNode>>,
    }

    struct VNodeHelper;

    impl Helper for VNodeHelper {
        type Object = VNode;

        fn type_id(&self) -> TypeId {
            TypeId::new("graph.vnode")
        }

        fn encode(&self, node: &VNode, saver: &mut dyn Saver) -> Result<Value> {
            let next = match &node.next {
                Some(next) => saver.encode_obj_value(next)?,
                None => Value::Null,
            };
            Ok(Value::map([("next", next)]))
        }

        fn blank(&self) -> VNode {
            VNode::default()
        }

        fn restore(&self, node: &mut VNode, state: &Value, loader: &mut dyn Loader) -> Result<()> {
            node.next = match state.get("next") {
                Some(Value::Null) | None => None,
                Some(embedded) => Some(loader.decode_obj_value(embedded)?),
            };
            Ok(())
        }
    }

    // A car whose version-0 encoding was a two-element list; version 1
    // reshapes it into a map.
    #[derive(Clone, Debug, Default, PartialEq)]
    struct OldCar {
        colour: String,
        make: String,
    }

    struct ListToMap;

    impl Migration for ListToMap {
        fn target_version(&self) -> u32 {
            1
        }

        fn upgrade(&self, state: Value, _ctx: &mut MigrationContext<'_>) -> Result<Value> {
            let colour = state.at(0).cloned().unwrap_or(Value::Null);
            let make = state.at(1).cloned().unwrap_or(Value::Null);
            Ok(Value::map([("colour", colour), ("make", make)]))
        }
    }

    struct OldCarHelper;

    impl Helper for OldCarHelper {
        type Object = OldCar;

        fn type_id(&self) -> TypeId {
            TypeId::new("garage.oldcar")
        }

        fn schema_version(&self) -> u32 {
            1
        }

        fn migrations(&self) -> Vec<Arc<dyn Migration>> {
            vec![Arc::new(ListToMap)]
        }

        fn encode(&self, car: &OldCar, _saver: &mut dyn Saver) -> Result<Value> {
            Ok(Value::map([
                ("colour", Value::from(car.colour.as_str())),
                ("make", Value::from(car.make.as_str())),
            ]))
        }

        fn blank(&self) -> OldCar {
            OldCar::default()
        }

        fn restore(&self, car: &mut OldCar, state: &Value, _loader: &mut dyn Loader) -> Result<()> {
            car.colour = text(state, "colour")?;
            car.make = text(state, "make")?;
            Ok(())
        }
    }

    // -- fixture plumbing -------------------------------------------------

    fn text(state: &Value, field: &str) -> Result<String> {
        state
            .get(field)
            .and_then(Value::as_text)
            .map(str::to_string)
            .ok_or_else(|| HistorianError::decoding(field, "missing or not text"))
    }

    fn register_all(historian: &Historian) {
        historian.register_helper(CarHelper).unwrap();
        historian.register_helper(PersonHelper).unwrap();
        historian.register_helper(NodeHelper).unwrap();
        historian.register_helper(EngineHelper).unwrap();
        historian.register_helper(BoatHelper).unwrap();
        historian.register_helper(VNodeHelper).unwrap();
        historian.register_helper(OldCarHelper).unwrap();
    }

    fn historian() -> Historian {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let historian = Historian::in_memory();
        register_all(&historian);
        historian
    }

    /// Two historians sharing one archive, as two processes would.
    fn shared_pair() -> (Historian, Historian) {
        let archive: Arc<dyn Archive> = Arc::new(InMemoryArchive::new());
        let a = Historian::new(archive.clone());
        let b = Historian::new(archive);
        register_all(&a);
        register_all(&b);
        (a, b)
    }

    fn red_car() -> Obj<Car> {
        new_obj(Car {
            colour: "red".into(),
            make: "zonda".into(),
        })
    }

    // -- saving and loading -----------------------------------------------

    #[test]
    fn save_load_roundtrip() {
        let historian = historian();
        let car = red_car();
        let snapshot = historian.save(&car).unwrap();
        assert_eq!(snapshot.version, 0);

        historian.forget(snapshot.object_id).unwrap();
        let loaded = historian.load::<Car>(snapshot.object_id).unwrap();
        assert!(!Arc::ptr_eq(&car, &loaded));
        assert_eq!(*loaded.read().unwrap(), *car.read().unwrap());
    }

    #[test]
    fn resave_of_unchanged_object_is_a_no_op() {
        let historian = historian();
        let car = red_car();
        let first = historian.save(&car).unwrap();
        let second = historian.save(&car).unwrap();
        assert_eq!(first, second);
        assert_eq!(historian.get_history(first.object_id).unwrap().len(), 1);
    }

    #[test]
    fn modification_bumps_the_version() {
        let historian = historian();
        let car = red_car();
        let v0 = historian.save(&car).unwrap();
        car.write().unwrap().colour = "blue".into();
        let v1 = historian.save(&car).unwrap();

        assert_eq!(v0.object_id, v1.object_id);
        assert_eq!((v0.version, v1.version), (0, 1));
        let history = historian.get_history(v0.object_id).unwrap();
        let versions: Vec<_> = history.iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![0, 1]);
    }

    #[test]
    fn unchanged_referent_writes_nothing_when_parent_changes() {
        let historian = historian();
        let car = red_car();
        let person = new_obj(Person {
            name: "martin".into(),
            car: Some(car.clone()),
        });
        let person_ref = historian.save(&person).unwrap();
        let car_ref = historian.snapshot_ref_of(&car).unwrap();

        person.write().unwrap().name = "sonia".into();
        historian.save(&person).unwrap();

        assert_eq!(historian.get_history(person_ref.object_id).unwrap().len(), 2);
        assert_eq!(historian.get_history(car_ref.object_id).unwrap().len(), 1);
    }

    #[test]
    fn save_many_commits_one_transaction() {
        let historian = historian();
        let cars = [red_car(), red_car(), red_car()];
        let snapshots = historian.save_many(&cars).unwrap();
        assert_eq!(snapshots.len(), 3);
        for (car, snapshot) in cars.iter().zip(&snapshots) {
            assert_eq!(historian.snapshot_ref_of(car).unwrap(), *snapshot);
        }
    }

    #[test]
    fn load_many_shares_referents() {
        let historian = historian();
        let car = red_car();
        let alice = new_obj(Person {
            name: "alice".into(),
            car: Some(car.clone()),
        });
        let bob = new_obj(Person {
            name: "bob".into(),
            car: Some(car.clone()),
        });
        let refs = historian.save_many(&[alice, bob]).unwrap();
        let ids: Vec<_> = refs.iter().map(|r| r.object_id).collect();
        let car_id = historian.snapshot_ref_of(&car).unwrap().object_id;

        // Drop the identity map and reload both people through one walk.
        for r in &refs {
            historian.forget(r.object_id).unwrap();
        }
        historian.forget(car_id).unwrap();

        let people = historian.load_many::<Person>(&ids).unwrap();
        let car_a = people[0].read().unwrap().car.clone().unwrap();
        let car_b = people[1].read().unwrap().car.clone().unwrap();
        assert!(Arc::ptr_eq(&car_a, &car_b));
    }

    // -- identity ---------------------------------------------------------

    #[test]
    fn repeated_loads_return_the_same_instance() {
        let historian = historian();
        let car = red_car();
        let snapshot = historian.save(&car).unwrap();

        let a = historian.load::<Car>(snapshot.object_id).unwrap();
        let b = historian.load::<Car>(snapshot.object_id).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &car));
    }

    #[test]
    fn loaded_parent_resolves_to_the_tracked_referent() {
        let (writer, reader) = shared_pair();
        let car = red_car();
        let person = new_obj(Person {
            name: "martin".into(),
            car: Some(car.clone()),
        });
        let person_ref = writer.save(&person).unwrap();
        let car_id = writer.snapshot_ref_of(&car).unwrap().object_id;

        // The reader picks up the car first and edits it in memory.
        let readers_car = reader.load::<Car>(car_id).unwrap();
        readers_car.write().unwrap().colour = "green".into();

        // Loading the person resolves the stored reference to the already
        // tracked instance, edits and all.
        let readers_person = reader.load::<Person>(person_ref.object_id).unwrap();
        let linked = readers_person.read().unwrap().car.clone().unwrap();
        assert!(Arc::ptr_eq(&linked, &readers_car));
        assert_eq!(linked.read().unwrap().colour, "green");
    }

    #[test]
    fn forget_detaches_the_instance() {
        let historian = historian();
        let car = red_car();
        let snapshot = historian.save(&car).unwrap();

        assert!(historian.forget(snapshot.object_id).unwrap());
        assert!(!historian.forget(snapshot.object_id).unwrap());

        let fresh = historian.load::<Car>(snapshot.object_id).unwrap();
        assert!(!Arc::ptr_eq(&fresh, &car));
        assert!(matches!(
            historian.snapshot_ref_of(&car),
            Err(HistorianError::NotTracked)
        ));
    }

    // -- cycles -----------------------------------------------------------

    #[test]
    fn reference_cycle_saves_and_loads_intact() {
        let historian = historian();
        let a = new_obj(Node {
            name: "a".into(),
            next: None,
        });
        let b = new_obj(Node {
            name: "b".into(),
            next: Some(a.clone()),
        });
        a.write().unwrap().next = Some(b.clone());

        let a_ref = historian.save(&a).unwrap();
        let b_ref = historian.snapshot_ref_of(&b).unwrap();
        assert_eq!(a_ref.version, 0);
        assert_eq!(b_ref.version, 0);

        historian.forget(a_ref.object_id).unwrap();
        historian.forget(b_ref.object_id).unwrap();

        let loaded_a = historian.load::<Node>(a_ref.object_id).unwrap();
        let loaded_b = loaded_a.read().unwrap().next.clone().unwrap();
        let back = loaded_b.read().unwrap().next.clone().unwrap();
        assert!(Arc::ptr_eq(&back, &loaded_a));
        assert_eq!(loaded_b.read().unwrap().name, "b");
    }

    #[test]
    fn resave_of_unchanged_cycle_is_a_no_op() {
        let historian = historian();
        let a = new_obj(Node {
            name: "a".into(),
            next: None,
        });
        let b = new_obj(Node {
            name: "b".into(),
            next: Some(a.clone()),
        });
        a.write().unwrap().next = Some(b.clone());

        let first = historian.save(&a).unwrap();
        let second = historian.save(&a).unwrap();
        assert_eq!(first, second);
        assert_eq!(second.version, 0);

        let b_ref = historian.snapshot_ref_of(&b).unwrap();
        assert_eq!(b_ref.version, 0);
        assert_eq!(historian.get_history(first.object_id).unwrap().len(), 1);
        assert_eq!(historian.get_history(b_ref.object_id).unwrap().len(), 1);
    }

    #[test]
    fn editing_one_cycle_member_leaves_the_other_untouched() {
        let historian = historian();
        let a = new_obj(Node {
            name: "a".into(),
            next: None,
        });
        let b = new_obj(Node {
            name: "b".into(),
            next: Some(a.clone()),
        });
        a.write().unwrap().next = Some(b.clone());
        let a_v0 = historian.save(&a).unwrap();
        let b_v0 = historian.snapshot_ref_of(&b).unwrap();

        a.write().unwrap().name = "a prime".into();
        let a_v1 = historian.save(&a).unwrap();

        assert_eq!(a_v1.version, 1);
        assert_eq!(historian.get_history(a_v0.object_id).unwrap().len(), 2);
        assert_eq!(historian.get_history(b_v0.object_id).unwrap().len(), 1);

        historian.forget(a_v0.object_id).unwrap();
        historian.forget(b_v0.object_id).unwrap();
        let loaded_a = historian.load::<Node>(a_v0.object_id).unwrap();
        assert_eq!(loaded_a.read().unwrap().name, "a prime");
        let loaded_b = loaded_a.read().unwrap().next.clone().unwrap();
        let back = loaded_b.read().unwrap().next.clone().unwrap();
        assert!(Arc::ptr_eq(&back, &loaded_a));
    }

    #[test]
    fn by_value_cycle_is_rejected() {
        let historian = historian();
        let a = new_obj(VNode::default());
        let b = new_obj(VNode {
            next: Some(a.clone()),
        });
        a.write().unwrap().next = Some(b);

        let err = historian.save(&a).unwrap_err();
        assert!(matches!(err, HistorianError::CyclicValueEmbedding { .. }));
        // Nothing was written.
        assert!(historian
            .find_records(&Query::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn by_value_embedding_roundtrips_as_plain_data() {
        let historian = historian();
        let boat = new_obj(Boat {
            engine: new_obj(Engine { power: 90 }),
        });
        let snapshot = historian.save(&boat).unwrap();

        // The engine has no record of its own.
        assert_eq!(historian.find_records(&Query::new()).unwrap().len(), 1);

        historian.forget(snapshot.object_id).unwrap();
        let loaded = historian.load::<Boat>(snapshot.object_id).unwrap();
        let engine = loaded.read().unwrap().engine.clone();
        assert_eq!(*engine.read().unwrap(), Engine { power: 90 });
        assert!(!Arc::ptr_eq(&engine, &boat.read().unwrap().engine));
    }

    // -- concurrency ------------------------------------------------------

    #[test]
    fn optimistic_lock_loser_gets_a_conflict() {
        let (a, b) = shared_pair();
        let car = red_car();
        let snapshot = a.save(&car).unwrap();

        let theirs = b.load::<Car>(snapshot.object_id).unwrap();

        car.write().unwrap().colour = "blue".into();
        a.save(&car).unwrap();

        theirs.write().unwrap().colour = "green".into();
        let err = b.save(&theirs).unwrap_err();
        assert!(matches!(
            err,
            HistorianError::ConcurrentModification {
                known: 0,
                latest: 1,
                ..
            }
        ));
        // The loser's conflict left no record behind.
        assert_eq!(a.get_history(snapshot.object_id).unwrap().len(), 2);
    }

    // -- history and pinned loads -----------------------------------------

    #[test]
    fn pinned_load_sees_the_old_state() {
        let historian = historian();
        let car = red_car();
        let v0 = historian.save(&car).unwrap();
        car.write().unwrap().colour = "blue".into();
        historian.save(&car).unwrap();

        let pinned = historian.load_snapshot::<Car>(v0).unwrap();
        assert_eq!(pinned.read().unwrap().colour, "red");
        // Detached: edits to the pinned copy never reach the live instance.
        assert!(!Arc::ptr_eq(&pinned, &car));
        pinned.write().unwrap().colour = "pink".into();
        assert_eq!(car.read().unwrap().colour, "blue");
    }

    #[test]
    fn pinned_parent_resolves_referents_at_their_recorded_versions() {
        let historian = historian();
        let car = red_car();
        let person = new_obj(Person {
            name: "martin".into(),
            car: Some(car.clone()),
        });
        let person_v0 = historian.save(&person).unwrap();

        car.write().unwrap().colour = "blue".into();
        historian.save(&car).unwrap();

        let pinned = historian.load_snapshot::<Person>(person_v0).unwrap();
        let pinned_car = pinned.read().unwrap().car.clone().unwrap();
        assert_eq!(pinned_car.read().unwrap().colour, "red");
        assert!(!Arc::ptr_eq(&pinned_car, &car));
    }

    // -- deletion ---------------------------------------------------------

    #[test]
    fn delete_appends_a_terminal_tombstone() {
        let historian = historian();
        let car = red_car();
        let v0 = historian.save(&car).unwrap();
        let tomb = historian.delete(&car).unwrap();
        assert_eq!(tomb, SnapshotRef::new(v0.object_id, 1));

        let history = historian.get_history(v0.object_id).unwrap();
        assert!(history[1].is_deleted());

        assert!(matches!(
            historian.load::<Car>(v0.object_id),
            Err(HistorianError::ObjectDeleted { .. })
        ));
        // The pre-deletion snapshot stays readable.
        let pinned = historian.load_snapshot::<Car>(v0).unwrap();
        assert_eq!(pinned.read().unwrap().colour, "red");
    }

    #[test]
    fn delete_of_an_untracked_object_fails() {
        let historian = historian();
        let car = red_car();
        assert!(matches!(
            historian.delete(&car),
            Err(HistorianError::NotTracked)
        ));
    }

    #[test]
    fn deleted_objects_are_invisible_to_queries() {
        let historian = historian();
        let car = red_car();
        historian.save(&car).unwrap();
        historian.delete(&car).unwrap();
        assert!(historian.find::<Car>(Query::new()).unwrap().is_empty());
    }

    // -- queries ----------------------------------------------------------

    #[test]
    fn find_filters_by_type_and_state() {
        let historian = historian();
        for colour in ["red", "red", "blue"] {
            let car = new_obj(Car {
                colour: colour.into(),
                make: "zonda".into(),
            });
            historian.save(&car).unwrap();
        }
        let person = new_obj(Person {
            name: "martin".into(),
            car: None,
        });
        historian.save(&person).unwrap();

        assert_eq!(historian.find::<Car>(Query::new()).unwrap().len(), 3);
        let red = historian
            .find::<Car>(Query::new().with_state_eq("colour", Value::from("red")))
            .unwrap();
        assert_eq!(red.len(), 2);
        for car in &red {
            assert_eq!(car.read().unwrap().colour, "red");
        }
        let capped = historian
            .find::<Car>(Query::new().with_limit(1))
            .unwrap();
        assert_eq!(capped.len(), 1);
    }

    // -- migration --------------------------------------------------------

    fn insert_legacy_oldcar(archive: &dyn Archive) -> SnapshotRef {
        let record = RecordBuilder::new(ObjectId::new(), TypeId::new("garage.oldcar"), 0)
            .state(Value::list([Value::from("red"), Value::from("zonda")]))
            .build();
        let snapshot = record.snapshot_ref();
        archive.insert(record).unwrap();
        snapshot
    }

    #[test]
    fn lagging_state_is_migrated_on_load_without_touching_the_record() {
        let archive: Arc<dyn Archive> = Arc::new(InMemoryArchive::new());
        let historian = Historian::new(archive.clone());
        register_all(&historian);
        let snapshot = insert_legacy_oldcar(archive.as_ref());

        let loaded = historian.load::<OldCar>(snapshot.object_id).unwrap();
        assert_eq!(
            *loaded.read().unwrap(),
            OldCar {
                colour: "red".into(),
                make: "zonda".into(),
            }
        );

        // The stored record is exactly as it was written.
        let stored = archive.get(snapshot.object_id, Some(0)).unwrap();
        assert_eq!(stored.state_schema_version, 0);
        assert!(stored.state_value().unwrap().as_list().is_some());
    }

    #[test]
    fn saving_a_migrated_object_writes_the_new_schema() {
        let archive: Arc<dyn Archive> = Arc::new(InMemoryArchive::new());
        let historian = Historian::new(archive.clone());
        register_all(&historian);
        let snapshot = insert_legacy_oldcar(archive.as_ref());

        let loaded = historian.load::<OldCar>(snapshot.object_id).unwrap();
        loaded.write().unwrap().colour = "blue".into();
        let v1 = historian.save(&loaded).unwrap();

        let stored = archive.get(v1.object_id, Some(1)).unwrap();
        assert_eq!(stored.state_schema_version, 1);
        assert_eq!(stored.state_value().unwrap().get("colour"), Some(&Value::from("blue")));
    }

    #[test]
    fn migrate_stored_rewrites_only_lagging_records() {
        let archive: Arc<dyn Archive> = Arc::new(InMemoryArchive::new());
        let historian = Historian::new(archive.clone());
        register_all(&historian);
        let legacy = insert_legacy_oldcar(archive.as_ref());

        let current = new_obj(OldCar {
            colour: "green".into(),
            make: "huayra".into(),
        });
        let current_ref = historian.save(&current).unwrap();

        let rewritten = historian.migrate_stored::<OldCar>().unwrap();
        assert_eq!(rewritten, vec![legacy]);

        let stored = archive.get(legacy.object_id, Some(0)).unwrap();
        assert_eq!(stored.state_schema_version, 1);
        let state = stored.state_value().unwrap();
        assert_eq!(state.get("colour"), Some(&Value::from("red")));
        // The hash tracks the rewritten state.
        assert_eq!(
            stored.content_hash,
            StateHasher::STATE.hash_state(&stored.type_id, state)
        );

        // Running again finds nothing to do.
        assert!(historian.migrate_stored::<OldCar>().unwrap().is_empty());
        let untouched = archive.get(current_ref.object_id, Some(0)).unwrap();
        assert_eq!(untouched.state_schema_version, 1);
    }

    // -- misc -------------------------------------------------------------

    #[test]
    fn save_ext_sugar() {
        use crate::convenience::SaveExt;
        let historian = historian();
        let car = red_car();
        let snapshot = car.save(&historian).unwrap();
        assert_eq!(historian.snapshot_ref_of(&car).unwrap(), snapshot);
    }

    #[test]
    fn unregistered_type_fails_cleanly() {
        let historian = Historian::in_memory();
        let car = red_car();
        assert!(matches!(
            historian.save(&car),
            Err(HistorianError::UnregisteredType { .. })
        ));
    }

    #[test]
    fn record_of_exposes_provenance() {
        let historian = historian();
        let car = red_car();
        let snapshot = historian.save(&car).unwrap();
        let record = historian.record_of(&car).unwrap();
        assert_eq!(record.snapshot_ref(), snapshot);
        assert_eq!(record.type_id, TypeId::new("garage.car"));
        assert!(!record.is_deleted());
    }

    #[test]
    fn first_save_stamps_the_creating_session() {
        let historian = historian();
        let stamp = Value::from(historian.session_id().to_string());

        let car = red_car();
        historian.save(&car).unwrap();
        let record = historian.record_of(&car).unwrap();
        assert_eq!(record.extra(extras::CREATED_BY), Some(&stamp));

        // The stamp survives later versions.
        car.write().unwrap().colour = "blue".into();
        historian.save(&car).unwrap();
        let record = historian.record_of(&car).unwrap();
        assert_eq!(record.extra(extras::CREATED_BY), Some(&stamp));
    }
}
