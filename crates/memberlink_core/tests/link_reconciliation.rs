use memberlink_core::db::open_db_in_memory;
use memberlink_core::{
    EntityKey, Group, GroupMember, LinkChange, LinkDelta, Member, SqliteEntityStore, Statement,
    UnitOfWork, UnitState, UowError,
};
use rusqlite::Connection;
use std::collections::BTreeSet;
use uuid::Uuid;

fn seed(conn: &mut Connection, group_count: usize) -> (Member, Vec<Group>) {
    let store = SqliteEntityStore::try_new(conn).unwrap();
    let mut uow = UnitOfWork::new(store);
    let member = Member::new();
    let groups: Vec<Group> = (0..group_count).map(|_| Group::new()).collect();
    for group in &groups {
        uow.persist_group(group).unwrap();
    }
    uow.persist_member(&member).unwrap();
    uow.flush().unwrap();
    (member, groups)
}

fn stored_links(uow: &UnitOfWork<SqliteEntityStore<'_>>) -> BTreeSet<GroupMember> {
    uow.store().all_links().unwrap().into_iter().collect()
}

#[test]
fn declared_links_follow_add_extend_shrink_sequence() {
    let mut conn = open_db_in_memory().unwrap();
    let (member, groups) = seed(&mut conn, 2);
    let (g1, g2) = (groups[0].id, groups[1].id);
    let store = SqliteEntityStore::try_new(&mut conn).unwrap();
    let mut uow = UnitOfWork::new(store);

    uow.declare_links(member.key(), [member.link_to(g1)])
        .unwrap();
    let report = uow.flush().unwrap();
    assert_eq!(report.statements, vec![Statement::InsertLink(member.link_to(g1))]);
    assert_eq!(stored_links(&uow), BTreeSet::from([member.link_to(g1)]));

    uow.declare_links(member.key(), [member.link_to(g1), member.link_to(g2)])
        .unwrap();
    let report = uow.flush().unwrap();
    assert_eq!(report.inserted_links(), vec![member.link_to(g2)]);
    assert!(report.deleted_links().is_empty());
    assert_eq!(
        stored_links(&uow),
        BTreeSet::from([member.link_to(g1), member.link_to(g2)])
    );

    uow.declare_links(member.key(), [member.link_to(g1)])
        .unwrap();
    let report = uow.flush().unwrap();
    assert_eq!(report.statements, vec![Statement::DeleteLink(member.link_to(g2))]);
    assert_eq!(stored_links(&uow), BTreeSet::from([member.link_to(g1)]));

    let loaded = uow.find_member(member.id).unwrap();
    assert_eq!(loaded.group_ids(), vec![g1]);

    // a fresh unit of work reads the same state back from the store
    let store = uow.close();
    let mut fresh = UnitOfWork::new(store);
    assert_eq!(fresh.find_member(member.id).unwrap().group_ids(), vec![g1]);
    assert_eq!(
        fresh.find_group(g2).unwrap().members,
        Vec::<GroupMember>::new()
    );
}

#[test]
fn redeclaring_same_set_issues_no_statements() {
    let mut conn = open_db_in_memory().unwrap();
    let (member, groups) = seed(&mut conn, 2);
    let declared: Vec<GroupMember> = groups.iter().map(|g| member.link_to(g.id)).collect();
    let store = SqliteEntityStore::try_new(&mut conn).unwrap();
    let mut uow = UnitOfWork::new(store);

    uow.declare_links(member.key(), declared.clone()).unwrap();
    assert_eq!(uow.flush().unwrap().statements.len(), 2);

    let delta = uow.declare_links(member.key(), declared).unwrap();
    assert!(delta.is_empty());
    assert_eq!(uow.state(), UnitState::Clean);
    assert!(uow.flush().unwrap().is_empty());
}

#[test]
fn shrinking_declaration_deletes_exactly_the_dropped_link() {
    let mut conn = open_db_in_memory().unwrap();
    let (member, groups) = seed(&mut conn, 2);
    let (a, b) = (member.link_to(groups[0].id), member.link_to(groups[1].id));
    let store = SqliteEntityStore::try_new(&mut conn).unwrap();
    let mut uow = UnitOfWork::new(store);

    uow.declare_links(member.key(), [a, b]).unwrap();
    uow.flush().unwrap();

    let delta = uow.declare_links(member.key(), [a]).unwrap();
    assert_eq!(delta, LinkDelta::removing([b]));
    let report = uow.flush().unwrap();
    assert_eq!(report.deleted_links(), vec![b]);
    assert!(report.inserted_links().is_empty());
    assert_eq!(uow.find_member(member.id).unwrap().groups, vec![a]);
}

#[test]
fn empty_declaration_removes_orphaned_links() {
    let mut conn = open_db_in_memory().unwrap();
    let (member, groups) = seed(&mut conn, 3);
    let store = SqliteEntityStore::try_new(&mut conn).unwrap();
    let mut uow = UnitOfWork::new(store);
    uow.declare_links(member.key(), groups.iter().map(|g| member.link_to(g.id)))
        .unwrap();
    uow.flush().unwrap();

    uow.declare_links(member.key(), Vec::<GroupMember>::new()).unwrap();
    let report = uow.flush().unwrap();
    assert_eq!(report.deleted_links().len(), 3);
    assert!(stored_links(&uow).is_empty());
    // the member itself survives
    assert!(uow.find_member(member.id).unwrap().groups.is_empty());
}

#[test]
fn remove_then_readd_before_flush_cancels_out() {
    let mut conn = open_db_in_memory().unwrap();
    let (member, groups) = seed(&mut conn, 1);
    let link = member.link_to(groups[0].id);
    let store = SqliteEntityStore::try_new(&mut conn).unwrap();
    let mut uow = UnitOfWork::new(store);
    uow.declare_links(member.key(), [link]).unwrap();
    uow.flush().unwrap();

    uow.record_delta(member.key(), LinkDelta::removing([link]))
        .unwrap();
    uow.record_delta(member.key(), LinkDelta::adding([link]))
        .unwrap();
    assert_eq!(uow.pending_link_changes(), vec![(link, LinkChange::Insert)]);
    assert_eq!(uow.state(), UnitState::Dirty);

    let report = uow.flush().unwrap();
    assert!(report.is_empty());
    assert_eq!(uow.state(), UnitState::Clean);
    assert_eq!(stored_links(&uow), BTreeSet::from([link]));
}

#[test]
fn add_then_remove_before_flush_cancels_out() {
    let mut conn = open_db_in_memory().unwrap();
    let (member, groups) = seed(&mut conn, 1);
    let link = member.link_to(groups[0].id);
    let store = SqliteEntityStore::try_new(&mut conn).unwrap();
    let mut uow = UnitOfWork::new(store);
    uow.find_member(member.id).unwrap();

    uow.record_delta(member.key(), LinkDelta::adding([link]))
        .unwrap();
    uow.record_delta(member.key(), LinkDelta::removing([link]))
        .unwrap();

    assert!(uow.flush().unwrap().is_empty());
    assert!(stored_links(&uow).is_empty());
}

#[test]
fn later_declaration_wins_before_flush() {
    let mut conn = open_db_in_memory().unwrap();
    let (member, groups) = seed(&mut conn, 2);
    let (a, b) = (member.link_to(groups[0].id), member.link_to(groups[1].id));
    let store = SqliteEntityStore::try_new(&mut conn).unwrap();
    let mut uow = UnitOfWork::new(store);

    uow.declare_links(member.key(), [a, b]).unwrap();
    let second = uow.declare_links(member.key(), [a]).unwrap();
    assert_eq!(second, LinkDelta::removing([b]));
    assert_eq!(uow.find_member(member.id).unwrap().groups, vec![a]);

    let report = uow.flush().unwrap();
    assert_eq!(report.statements, vec![Statement::InsertLink(a)]);
    assert_eq!(stored_links(&uow), BTreeSet::from([a]));
}

#[test]
fn statements_are_issued_in_key_order() {
    let mut conn = open_db_in_memory().unwrap();
    let (member, groups) = seed(&mut conn, 4);
    let store = SqliteEntityStore::try_new(&mut conn).unwrap();
    let mut uow = UnitOfWork::new(store);

    uow.declare_links(member.key(), groups.iter().rev().map(|g| member.link_to(g.id)))
        .unwrap();
    let inserted = uow.flush().unwrap().inserted_links();

    let mut expected: Vec<GroupMember> = groups.iter().map(|g| member.link_to(g.id)).collect();
    expected.sort();
    assert_eq!(inserted, expected);
}

#[test]
fn links_declared_from_group_side_are_visible_from_members() {
    let mut conn = open_db_in_memory().unwrap();
    let (first, groups) = seed(&mut conn, 1);
    let group = &groups[0];
    let second = Member::new();
    let store = SqliteEntityStore::try_new(&mut conn).unwrap();
    let mut uow = UnitOfWork::new(store);
    uow.persist_member(&second).unwrap();
    uow.flush().unwrap();

    uow.declare_links(group.key(), [first.link_to(group.id), second.link_to(group.id)])
        .unwrap();
    uow.flush().unwrap();

    assert_eq!(uow.find_member(first.id).unwrap().group_ids(), vec![group.id]);
    assert_eq!(uow.find_member(second.id).unwrap().group_ids(), vec![group.id]);
    let mut expected = vec![first.id, second.id];
    expected.sort();
    assert_eq!(uow.find_group(group.id).unwrap().member_ids(), expected);
}

#[test]
fn new_member_with_links_is_inserted_before_its_links() {
    let mut conn = open_db_in_memory().unwrap();
    let store = SqliteEntityStore::try_new(&mut conn).unwrap();
    let mut uow = UnitOfWork::new(store);
    let group = Group::new();
    let mut member = Member::new();
    member.groups.push(member.link_to(group.id));

    uow.persist_group(&group).unwrap();
    uow.persist_member(&member).unwrap();
    let report = uow.flush().unwrap();

    assert_eq!(
        report.statements,
        vec![
            Statement::InsertGroup(group.id),
            Statement::InsertMember(member.id),
            Statement::InsertLink(member.link_to(group.id)),
        ]
    );
    assert_eq!(uow.find_member(member.id).unwrap(), member);
}

#[test]
fn declaring_link_owned_by_another_entity_is_rejected() {
    let mut conn = open_db_in_memory().unwrap();
    let (member, groups) = seed(&mut conn, 1);
    let store = SqliteEntityStore::try_new(&mut conn).unwrap();
    let mut uow = UnitOfWork::new(store);
    let stranger = GroupMember::new(Uuid::new_v4(), groups[0].id);

    let err = uow.declare_links(member.key(), [stranger]).unwrap_err();
    match err {
        UowError::ForeignLink { owner, link } => {
            assert_eq!(owner, member.key());
            assert_eq!(link, stranger);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(uow.pending_link_changes().is_empty());
}

#[test]
fn missing_link_target_aborts_the_delta() {
    let mut conn = open_db_in_memory().unwrap();
    let (member, groups) = seed(&mut conn, 1);
    let store = SqliteEntityStore::try_new(&mut conn).unwrap();
    let mut uow = UnitOfWork::new(store);
    let ghost = Uuid::new_v4();

    let err = uow
        .declare_links(member.key(), [member.link_to(groups[0].id), member.link_to(ghost)])
        .unwrap_err();
    assert!(matches!(err, UowError::NotFound(EntityKey::Group(id)) if id == ghost));
    assert!(uow.pending_link_changes().is_empty());
    assert_eq!(uow.state(), UnitState::Clean);
    assert!(uow.flush().unwrap().is_empty());
}

#[test]
fn recorded_delta_to_missing_group_is_not_found() {
    let mut conn = open_db_in_memory().unwrap();
    let (member, _) = seed(&mut conn, 0);
    let store = SqliteEntityStore::try_new(&mut conn).unwrap();
    let mut uow = UnitOfWork::new(store);
    let ghost = Uuid::new_v4();

    let err = uow
        .record_delta(member.key(), LinkDelta::adding([member.link_to(ghost)]))
        .unwrap_err();
    assert!(matches!(err, UowError::NotFound(EntityKey::Group(id)) if id == ghost));
    assert!(uow.pending_link_changes().is_empty());
    assert_eq!(uow.state(), UnitState::Clean);
    assert!(uow.flush().unwrap().is_empty());
    assert!(stored_links(&uow).is_empty());
}

#[test]
fn persisting_member_linked_to_missing_group_schedules_nothing() {
    let mut conn = open_db_in_memory().unwrap();
    let store = SqliteEntityStore::try_new(&mut conn).unwrap();
    let mut uow = UnitOfWork::new(store);
    let ghost = Uuid::new_v4();
    let mut member = Member::new();
    member.groups.push(member.link_to(ghost));

    let err = uow.persist_member(&member).unwrap_err();
    assert!(matches!(err, UowError::NotFound(EntityKey::Group(id)) if id == ghost));
    assert!(uow.pending_link_changes().is_empty());
    assert_eq!(uow.state(), UnitState::Clean);
    assert!(uow.registry().is_empty());
    assert!(uow.flush().unwrap().is_empty());
    assert!(matches!(
        uow.find_member(member.id),
        Err(UowError::NotFound(_))
    ));
}

#[test]
fn persisting_managed_member_again_keeps_other_pending_work() {
    let mut conn = open_db_in_memory().unwrap();
    let store = SqliteEntityStore::try_new(&mut conn).unwrap();
    let mut uow = UnitOfWork::new(store);
    let group = Group::new();
    let member = Member::new();
    uow.persist_group(&group).unwrap();
    uow.persist_member(&member).unwrap();
    uow.flush().unwrap();

    let other = Group::new();
    uow.persist_group(&other).unwrap();
    uow.persist_member(&member).unwrap();
    assert_eq!(uow.state(), UnitState::Dirty);
    let report = uow.flush().unwrap();
    assert_eq!(report.statements, vec![Statement::InsertGroup(other.id)]);

    // a changed link set on re-persist is reconciled like a declaration
    let mut linked = member.clone();
    linked.groups.push(member.link_to(group.id));
    uow.persist_member(&linked).unwrap();
    uow.persist_member(&linked).unwrap();
    let report = uow.flush().unwrap();
    assert_eq!(report.statements, vec![Statement::InsertLink(member.link_to(group.id))]);
    assert_eq!(stored_links(&uow), BTreeSet::from([member.link_to(group.id)]));
}

#[test]
fn unknown_owner_is_not_found() {
    let mut conn = open_db_in_memory().unwrap();
    let store = SqliteEntityStore::try_new(&mut conn).unwrap();
    let mut uow = UnitOfWork::new(store);
    let member = Member::new();

    let err = uow.declare_links(member.key(), Vec::<GroupMember>::new()).unwrap_err();
    assert!(matches!(err, UowError::NotFound(key) if key == member.key()));
    assert!(matches!(
        uow.find_member(member.id),
        Err(UowError::NotFound(_))
    ));
}

#[test]
fn conflicting_attach_discards_the_unit_of_work() {
    let mut conn = open_db_in_memory().unwrap();
    let (member, groups) = seed(&mut conn, 1);
    let store = SqliteEntityStore::try_new(&mut conn).unwrap();
    let mut uow = UnitOfWork::new(store);
    uow.declare_links(member.key(), [member.link_to(groups[0].id)])
        .unwrap();

    // same intent is fine
    let mut same = Member::with_id(member.id);
    same.groups.push(member.link_to(groups[0].id));
    uow.attach_member(&same).unwrap();
    assert_eq!(uow.state(), UnitState::Dirty);

    let stale = Member::with_id(member.id);
    let err = uow.attach_member(&stale).unwrap_err();
    assert!(matches!(err, UowError::DuplicateIdentity(key) if key == member.key()));
    assert_eq!(uow.state(), UnitState::Clean);
    assert!(uow.registry().is_empty());
    assert!(uow.flush().unwrap().is_empty());
    assert!(stored_links(&uow).is_empty());
}

#[test]
fn repeated_finds_resolve_through_the_registry() {
    let mut conn = open_db_in_memory().unwrap();
    let (member, groups) = seed(&mut conn, 1);
    let store = SqliteEntityStore::try_new(&mut conn).unwrap();
    let mut uow = UnitOfWork::new(store);

    let first = uow.find_member(member.id).unwrap();
    uow.declare_links(member.key(), [member.link_to(groups[0].id)])
        .unwrap();
    let second = uow.find_member(member.id).unwrap();

    assert!(first.groups.is_empty());
    assert_eq!(second.groups, vec![member.link_to(groups[0].id)]);
    // the group side sees the unflushed link too
    assert_eq!(uow.find_group(groups[0].id).unwrap().member_ids(), vec![member.id]);
    assert_eq!(uow.registry().len(), 2);
}
