use std::collections::BTreeSet;

use super::*;
use crate::notify::{ChannelSink, QueryEventKind};
use crate::registry::LiveQueryRegistry;
use crate::types::{VolumeId, LAST_MODIFIED_ATTRIBUTE, SIZE_ATTRIBUTE};
use crate::volume::{AttributeData, IndexInfo, MemoryNode, MemoryVolume, Node};

fn abc_volume() -> MemoryVolume {
    let volume = MemoryVolume::new(VolumeId::new(7));
    for (name, size) in [("a", 10), ("b", 20), ("c", 30)] {
        let id = volume
            .create_entry(MemoryVolume::ROOT, name)
            .expect("create entry");
        volume.set_size(id, size).expect("set size");
    }
    volume
}

fn names(query: &mut Query<'_>) -> Vec<String> {
    let mut names = Vec::new();
    while let Some(entry) = query.get_next_entry().expect("next entry") {
        names.push(entry.name);
    }
    names
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

#[test]
fn range_conjunction_yields_middle_entry() {
    let volume = abc_volume();
    let mut query =
        Query::parse(&volume, "size>=15 && size<=25", QueryFlags::empty()).expect("query");
    assert_eq!(names(&mut query), ["b"]);
}

#[test]
fn disjunction_yields_each_entry_once() {
    let volume = abc_volume();
    let mut query =
        Query::parse(&volume, "name=\"a\" || size=30", QueryFlags::empty()).expect("query");
    assert_eq!(sorted(names(&mut query)), ["a", "c"]);

    let mut overlapping =
        Query::parse(&volume, "name == a || size <= 10", QueryFlags::empty()).expect("query");
    assert_eq!(names(&mut overlapping), ["a"]);
}

#[test]
fn entries_carry_volume_and_parent() {
    let volume = abc_volume();
    let mut query = Query::parse(&volume, "name == b", QueryFlags::empty()).expect("query");
    let entry = query.get_next_entry().expect("next").expect("entry");
    assert_eq!(entry.volume, VolumeId::new(7));
    assert_eq!(entry.parent_volume, VolumeId::new(7));
    assert_eq!(entry.parent, MemoryVolume::ROOT);
    assert_eq!(entry.name, "b");
    assert!(query.get_next_entry().expect("next").is_none());
    assert!(query.get_next_entry().expect("next").is_none());
}

#[test]
fn rewind_repeats_the_same_sequence() {
    let volume = abc_volume();
    let mut query = Query::parse(
        &volume,
        "size > 5 || name == \"b\"",
        QueryFlags::empty(),
    )
    .expect("query");

    query.rewind();
    let first = names(&mut query);
    query.rewind();
    let second = names(&mut query);
    assert_eq!(first, ["a", "b", "c"]);
    assert_eq!(first, second);
}

#[test]
fn rewind_mid_scan_restarts() {
    let volume = abc_volume();
    let mut query = Query::parse(&volume, "size >= 10", QueryFlags::empty()).expect("query");
    let first = query.get_next_entry().expect("next").expect("entry");
    query.rewind();
    let again = query.get_next_entry().expect("next").expect("entry");
    assert_eq!(first, again);
}

#[test]
fn iterator_collects_results() {
    let volume = abc_volume();
    let query = Query::parse(&volume, "size < 30", QueryFlags::empty()).expect("query");
    let entries = query.collect::<Result<Vec<_>>>().expect("entries");
    assert_eq!(
        entries.into_iter().map(|entry| entry.name).collect::<Vec<_>>(),
        ["a", "b"]
    );
}

#[test]
fn invalid_expression_is_rejected() {
    let volume = abc_volume();
    let error = Query::parse(&volume, "size >", QueryFlags::empty()).unwrap_err();
    assert!(matches!(error, QueryError::InvalidExpression { .. }));
}

#[test]
fn missing_exact_key_yields_nothing() {
    let volume = abc_volume();
    let mut query = Query::parse(&volume, "name == zzz", QueryFlags::empty()).expect("query");
    assert!(names(&mut query).is_empty());
}

#[test]
fn unindexed_attribute_needs_non_indexed_flag() {
    let volume = abc_volume();
    let id = volume.create_entry(MemoryVolume::ROOT, "d").expect("create");
    volume
        .write_attribute(id, "color", AttributeData::new(AttrType::String, b"red".to_vec()))
        .expect("write");

    let mut skipped = Query::parse(&volume, "color == red", QueryFlags::empty()).expect("query");
    assert!(names(&mut skipped).is_empty());

    let mut scanned =
        Query::parse(&volume, "color == red", QueryFlags::QUERY_NON_INDEXED).expect("query");
    assert_eq!(names(&mut scanned), ["d"]);
}

#[test]
fn unequal_scans_all_names_even_when_indexed() {
    let volume = abc_volume();
    let mut query = Query::parse(&volume, "size != 20", QueryFlags::empty()).expect("query");
    assert_eq!(sorted(names(&mut query)), ["a", "c"]);
}

#[test]
fn quoted_empty_string_finds_empty_values() {
    let volume = abc_volume();
    let id = volume.create_entry(MemoryVolume::ROOT, "blank").expect("create");
    volume
        .write_attribute(id, "label", AttributeData::new(AttrType::String, Vec::new()))
        .expect("write");
    let other = volume.create_entry(MemoryVolume::ROOT, "named").expect("create");
    volume
        .write_attribute(other, "label", AttributeData::new(AttrType::String, b"x".to_vec()))
        .expect("write");
    volume.create_index("label", AttrType::String).expect("index");

    let mut query = Query::parse(&volume, "label == \"\"", QueryFlags::empty()).expect("query");
    assert_eq!(names(&mut query), ["blank"]);
}

#[test]
fn modification_time_compares_unshifted() {
    let volume = abc_volume();
    for (name, seconds) in [("a", 100), ("b", 200), ("c", 300)] {
        let mut lookup = Query::parse(&volume, &format!("name == {name}"), QueryFlags::empty())
            .expect("query");
        let entry = lookup.get_next_entry().expect("next").expect("entry");
        volume.set_last_modified(entry.id, seconds).expect("touch");
    }

    let mut exact =
        Query::parse(&volume, "last_modified == 200", QueryFlags::empty()).expect("query");
    assert_eq!(names(&mut exact), ["b"]);

    let mut newer =
        Query::parse(&volume, "last_modified >= 150", QueryFlags::empty()).expect("query");
    assert_eq!(names(&mut newer), ["b", "c"]);
}

// ---- set semantics against brute force ----

fn mixed_volume() -> (MemoryVolume, Vec<EntryId>) {
    let volume = MemoryVolume::new(VolumeId::new(1));
    let mut ids = Vec::new();
    for position in 0..12i64 {
        let id = volume
            .create_entry(MemoryVolume::ROOT, &format!("f{position}"))
            .expect("create");
        volume.set_size(id, (position * 7) % 5 * 10).expect("size");
        volume
            .set_last_modified(id, 1000 + position % 3)
            .expect("time");
        if position % 2 == 0 {
            let color = if position % 4 == 0 { "red" } else { "blue" };
            volume
                .write_attribute(
                    id,
                    "color",
                    AttributeData::new(AttrType::String, color.as_bytes().to_vec()),
                )
                .expect("color");
        }
        if position < 8 {
            let rating = (position % 4) as i32;
            volume
                .write_attribute(
                    id,
                    "rating",
                    AttributeData::new(AttrType::Int32, rating.to_le_bytes()),
                )
                .expect("rating");
        }
        ids.push(id);
    }
    volume.create_index("rating", AttrType::Int32).expect("index");
    (volume, ids)
}

fn brute_force(volume: &MemoryVolume, ids: &[EntryId], text: &str) -> BTreeSet<EntryId> {
    let expression = Expression::parse(text);
    ids.iter()
        .copied()
        .filter(|id| {
            let node = volume.node(*id).expect("node");
            expression.matches_node(&node, None).expect("match")
        })
        .collect()
}

#[test]
fn scans_match_brute_force_evaluation() {
    let (volume, ids) = mixed_volume();
    for text in [
        "size >= 20 && size < 40",
        "size == 20 || size == 0",
        "name == \"f1*\" && size > 0",
        "color == red || rating >= 2",
        "color != red",
        "rating != 1",
        "last_modified == 1001",
        "last_modified > 1000 && name == \"f?\"",
        "!(size == 0 || name == f3)",
        "(name == f1 || name == f2) && (size > 5 || rating == 0)",
        "rating < 2 && color == blue",
    ] {
        let mut query =
            Query::parse(&volume, text, QueryFlags::QUERY_NON_INDEXED).expect("query");
        let mut produced = Vec::new();
        while let Some(entry) = query.get_next_entry().expect("next") {
            produced.push(entry.id);
        }
        let unique = produced.iter().copied().collect::<BTreeSet<_>>();
        assert_eq!(unique.len(), produced.len(), "duplicates for {text:?}");
        assert_eq!(unique, brute_force(&volume, &ids, text), "results for {text:?}");
    }
}

#[test]
fn and_is_intersection_and_or_is_union() {
    let (volume, ids) = mixed_volume();
    let left = brute_force(&volume, &ids, "size >= 20");
    let right = brute_force(&volume, &ids, "rating <= 1");

    let collect = |text: &str| {
        Query::parse(&volume, text, QueryFlags::QUERY_NON_INDEXED)
            .expect("query")
            .map(|entry| entry.expect("entry").id)
            .collect::<BTreeSet<_>>()
    };

    assert_eq!(
        collect("size >= 20 && rating <= 1"),
        left.intersection(&right).copied().collect()
    );
    assert_eq!(
        collect("size >= 20 || rating <= 1"),
        left.union(&right).copied().collect()
    );
}

// ---- float indices ----

fn float_volume() -> (MemoryVolume, Vec<(&'static str, EntryId)>) {
    let volume = MemoryVolume::new(VolumeId::new(2));
    volume.create_index("temp", AttrType::Double).expect("temp index");
    volume.create_index("gain", AttrType::Float).expect("gain index");

    let mut entries = Vec::new();
    for (name, temp, gain) in [
        ("minus", -3.0f64, None),
        ("neg_zero", -0.0, Some(-0.0f32)),
        ("one", 1.0, Some(1.0)),
        ("big", 7.5, None),
        ("neg_nan", -f64::NAN, Some(-f32::NAN)),
    ] {
        let id = volume.create_entry(MemoryVolume::ROOT, name).expect("create");
        volume
            .write_attribute(id, "temp", AttributeData::new(AttrType::Double, temp.to_le_bytes()))
            .expect("temp");
        if let Some(gain) = gain {
            volume
                .write_attribute(id, "gain", AttributeData::new(AttrType::Float, gain.to_le_bytes()))
                .expect("gain");
        }
        entries.push((name, id));
    }
    (volume, entries)
}

fn scanned(volume: &MemoryVolume, text: &str) -> BTreeSet<EntryId> {
    Query::parse(volume, text, QueryFlags::empty())
        .expect("query")
        .map(|entry| entry.expect("entry").id)
        .collect()
}

#[test]
fn negative_zero_is_found_by_exact_and_range_seeks() {
    let (volume, entries) = float_volume();
    let neg_zero = BTreeSet::from([entries[1].1]);
    assert_eq!(scanned(&volume, "temp == 0"), neg_zero);
    assert_eq!(scanned(&volume, "gain == 0"), neg_zero);
    assert!(scanned(&volume, "temp >= 0").contains(&entries[1].1));
}

#[test]
fn negative_nan_does_not_cut_bounded_scans_short() {
    let (volume, entries) = float_volume();
    let below_five = entries
        .iter()
        .filter(|(name, _)| matches!(*name, "minus" | "neg_zero" | "one"))
        .map(|(_, id)| *id)
        .collect::<BTreeSet<_>>();
    assert_eq!(scanned(&volume, "temp < 5"), below_five);
    assert_eq!(
        scanned(&volume, "gain <= 1"),
        BTreeSet::from([entries[1].1, entries[2].1])
    );
}

#[test]
fn float_scans_match_brute_force_evaluation() {
    let (volume, entries) = float_volume();
    let ids = entries.iter().map(|(_, id)| *id).collect::<Vec<_>>();
    for text in [
        "temp == 0",
        "temp >= 0",
        "temp > 1",
        "temp < 5",
        "temp <= -3",
        "temp != 1",
        "gain < 0.5",
        "gain >= 0",
        "temp > -1 && gain <= 1",
        "temp == 7.5 || gain == 1",
    ] {
        assert_eq!(
            scanned(&volume, text),
            brute_force(&volume, &ids, text),
            "results for {text:?}"
        );
    }
}

// ---- collaborator failures ----

/// Delegates to a memory volume but misreports selected nodes and indices.
struct FaultyVolume<'a> {
    inner: &'a MemoryVolume,
    missing: Option<EntryId>,
    broken: Option<EntryId>,
    opaque_index: Option<&'static str>,
}

impl<'a> FaultyVolume<'a> {
    fn new(inner: &'a MemoryVolume) -> Self {
        Self {
            inner,
            missing: None,
            broken: None,
            opaque_index: None,
        }
    }
}

struct BrokenNode(MemoryNode);

impl Node for BrokenNode {
    fn id(&self) -> EntryId {
        self.0.id()
    }

    fn parent(&self) -> EntryId {
        self.0.parent()
    }

    fn name(&self) -> Result<String> {
        self.0.name()
    }

    fn size(&self) -> i64 {
        self.0.size()
    }

    fn last_modified(&self) -> i64 {
        self.0.last_modified()
    }

    fn small_data(&self, _attribute: &str) -> Option<AttributeData> {
        None
    }

    fn read_attribute(&self, attribute: &str, _limit: usize) -> Result<Option<AttributeData>> {
        Err(QueryError::AttributeRead {
            attribute: attribute.to_string(),
            reason: "checksum mismatch".to_string(),
        })
    }
}

impl Volume for FaultyVolume<'_> {
    fn id(&self) -> VolumeId {
        self.inner.id()
    }

    fn index_info(&self, attribute: &str) -> Option<IndexInfo> {
        if self.opaque_index == Some(attribute) {
            return Some(IndexInfo {
                attr_type: AttrType::Other(0x5241_5754),
                key_size: 0,
                size: 2048,
            });
        }
        self.inner.index_info(attribute)
    }

    fn open_index(&self, attribute: &str) -> Result<Option<Box<dyn IndexIterator + '_>>> {
        self.inner.open_index(attribute)
    }

    fn get_node(&self, id: EntryId) -> Result<Box<dyn Node + '_>> {
        if self.missing == Some(id) {
            return Err(QueryError::NodeNotFound(id));
        }
        if self.broken == Some(id) {
            let node = self.inner.node(id).ok_or(QueryError::NodeNotFound(id))?;
            return Ok(Box::new(BrokenNode(node)));
        }
        self.inner.get_node(id)
    }

    fn live_queries(&self) -> &LiveQueryRegistry {
        self.inner.live_queries()
    }
}

fn id_of(volume: &MemoryVolume, name: &str) -> EntryId {
    Query::parse(volume, &format!("name == {name}"), QueryFlags::empty())
        .expect("query")
        .get_next_entry()
        .expect("next")
        .expect("entry")
        .id
}

#[test]
fn stale_index_entries_are_skipped() {
    let volume = abc_volume();
    let mut faulty = FaultyVolume::new(&volume);
    faulty.missing = Some(id_of(&volume, "b"));

    let mut query = Query::parse(&faulty, "size > 0", QueryFlags::empty()).expect("query");
    assert_eq!(names(&mut query), ["a", "c"]);
}

#[test]
fn attribute_read_failures_propagate() {
    let volume = abc_volume();
    let mut faulty = FaultyVolume::new(&volume);
    faulty.broken = Some(id_of(&volume, "a"));

    let mut query =
        Query::parse(&faulty, "color == red", QueryFlags::QUERY_NON_INDEXED).expect("query");
    let error = query.get_next_entry().unwrap_err();
    assert!(matches!(error, QueryError::AttributeRead { .. }));
}

#[test]
fn index_without_comparable_type_is_an_error() {
    let volume = abc_volume();
    let mut faulty = FaultyVolume::new(&volume);
    faulty.opaque_index = Some("blob");

    let mut query = Query::parse(&faulty, "blob == x", QueryFlags::empty()).expect("query");
    let error = query.get_next_entry().unwrap_err();
    assert!(matches!(error, QueryError::UnsupportedType { .. }));
}

// ---- live registration ----

#[test]
fn live_query_registers_until_dropped() {
    let volume = abc_volume();
    {
        let query = Query::parse(&volume, "size > 15", QueryFlags::LIVE).expect("query");
        assert!(query.is_live());
        assert_eq!(volume.live_queries().len(), 1);
    }
    assert!(volume.live_queries().is_empty());

    let one_shot = Query::parse(&volume, "size > 15", QueryFlags::empty()).expect("query");
    assert!(!one_shot.is_live());
    assert!(volume.live_queries().is_empty());
}

#[test]
fn set_live_mode_attaches_and_swaps_listeners() {
    let volume = abc_volume();
    let a = id_of(&volume, "a");
    let mut query = Query::parse(&volume, "size > 15", QueryFlags::empty()).expect("query");

    let (first, mut first_events) = ChannelSink::listener(1);
    query.set_live_mode(first);
    assert_eq!(volume.live_queries().len(), 1);

    volume.set_size(a, 40).expect("grow");
    let event = first_events.try_recv().expect("created event");
    assert_eq!(event.kind, QueryEventKind::EntryCreated);
    assert_eq!(event.name, "a");
    assert_eq!(event.token, 1);

    let (second, mut second_events) = ChannelSink::listener(2);
    query.set_live_mode(second);
    assert_eq!(volume.live_queries().len(), 1);

    volume.set_size(a, 1).expect("shrink");
    assert!(first_events.try_recv().is_err());
    let event = second_events.try_recv().expect("removed event");
    assert_eq!(event.kind, QueryEventKind::EntryRemoved);
    assert_eq!(event.token, 2);
}

#[test]
fn live_query_with_listener_sees_new_entries() {
    let volume = abc_volume();
    let (listener, mut events) = ChannelSink::listener(3);
    let query = Query::with_listener(
        &volume,
        Expression::parse("name == \"new*\""),
        QueryFlags::empty(),
        listener,
    )
    .expect("query");
    assert!(query.is_live());

    volume.create_entry(MemoryVolume::ROOT, "newfile").expect("create");
    let event = events.try_recv().expect("event");
    assert_eq!(event.kind, QueryEventKind::EntryCreated);
    assert_eq!(event.name, "newfile");
    assert_eq!(event.directory, MemoryVolume::ROOT);

    volume.create_entry(MemoryVolume::ROOT, "other").expect("create");
    assert!(events.try_recv().is_err());

    drop(query);
    volume.create_entry(MemoryVolume::ROOT, "newer").expect("create");
    assert!(events.try_recv().is_err());
}

#[test]
fn scores_are_exposed_per_term() {
    let volume = abc_volume();
    let query = Query::parse(&volume, "size == 10", QueryFlags::empty()).expect("query");
    let root = query.expression().root().expect("root");
    let info = volume.index_info(SIZE_ATTRIBUTE).expect("size index");
    assert_eq!(query.scores().score(root), 2048 * 2048 * 1024 / info.size as i64);
    assert!(volume.index_info(LAST_MODIFIED_ATTRIBUTE).is_some());
}
