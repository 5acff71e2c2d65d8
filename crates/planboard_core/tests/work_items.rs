use planboard_core::db::open_db_in_memory;
use planboard_core::{
    ExpectedParent, HierarchyError, HierarchyRules, NodeKind, RecalculationPolicy,
    SqliteHierarchyRepository, TaskParentPolicy, WorkItemService,
};
use rusqlite::Connection;
use uuid::Uuid;

fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

#[test]
fn creation_appends_to_sibling_group() {
    let conn = setup();
    let repo = SqliteHierarchyRepository::try_new(&conn).unwrap();
    let service = WorkItemService::new(repo);

    let epic = service.create_epic("Release").unwrap();
    let first = service.create_story(Some(epic.id), "Api").unwrap();
    let second = service.create_story(Some(epic.id), "  Ui  ").unwrap();
    let task = service.create_task(Some(first.id), "Schema").unwrap();

    assert_eq!(epic.sort_order, Some(0));
    assert_eq!(first.sort_order, Some(0));
    assert_eq!(second.sort_order, Some(1));
    assert_eq!(second.title, "Ui");
    assert_eq!(task.kind, NodeKind::Task);
    assert_eq!(task.parent_id, Some(first.id));

    let children: Vec<_> = service
        .list_children(Some(epic.id))
        .unwrap()
        .into_iter()
        .map(|node| node.id)
        .collect();
    assert_eq!(children, vec![first.id, second.id]);
    assert_eq!(service.get_item(task.id).unwrap(), Some(task));
}

#[test]
fn creation_enforces_parentage() {
    let conn = setup();
    let repo = SqliteHierarchyRepository::try_new(&conn).unwrap();
    let service = WorkItemService::new(repo);

    let epic = service.create_epic("Release").unwrap();
    let story = service.create_story(Some(epic.id), "Api").unwrap();

    assert!(service.create_story(None, "Loose").is_ok());
    assert!(matches!(
        service.create_story(Some(story.id), "Nested").unwrap_err(),
        HierarchyError::TypeViolation {
            expected: ExpectedParent::EpicOrNoParent,
            ..
        }
    ));
    assert!(matches!(
        service.create_task(Some(epic.id), "Skip").unwrap_err(),
        HierarchyError::TypeViolation {
            expected: ExpectedParent::Story,
            ..
        }
    ));
    assert!(matches!(
        service.create_task(None, "Alone").unwrap_err(),
        HierarchyError::TypeViolation {
            parent_kind: None,
            ..
        }
    ));

    let missing = Uuid::new_v4();
    assert!(matches!(
        service.create_task(Some(missing), "Orphan").unwrap_err(),
        HierarchyError::NotFound(id) if id == missing
    ));
    assert!(service.list_children(Some(story.id)).unwrap().is_empty());
}

#[test]
fn standalone_tasks_allowed_by_policy() {
    let conn = setup();
    let repo = SqliteHierarchyRepository::try_new(&conn).unwrap();
    let rules = HierarchyRules::default().with_task_parent(TaskParentPolicy::AllowStandalone);
    let service = WorkItemService::with_rules(repo, rules);

    let task = service.create_task(None, "Alone").unwrap();
    assert_eq!(task.parent_id, None);
    assert_eq!(task.sort_order, Some(0));
}

#[test]
fn blank_titles_are_rejected() {
    let conn = setup();
    let repo = SqliteHierarchyRepository::try_new(&conn).unwrap();
    let service = WorkItemService::new(repo);

    assert!(matches!(
        service.create_epic("   ").unwrap_err(),
        HierarchyError::InvalidTitle
    ));
    let epic = service.create_epic("Release").unwrap();
    assert!(matches!(
        service.add_subtask(epic.id, "").unwrap_err(),
        HierarchyError::InvalidTitle
    ));
}

#[test]
fn subtask_changes_refresh_the_whole_chain() {
    let conn = setup();
    let repo = SqliteHierarchyRepository::try_new(&conn).unwrap();
    let service = WorkItemService::new(repo);

    let epic = service.create_epic("Release").unwrap();
    let story = service.create_story(Some(epic.id), "Api").unwrap();
    let task = service.create_task(Some(story.id), "Schema").unwrap();

    let draft = service.add_subtask(task.id, "draft").unwrap();
    let review = service.add_subtask(task.id, "review").unwrap();
    assert_eq!(draft.sort_order, 0);
    assert_eq!(review.sort_order, 1);

    let progress = |id| service.get_item(id).unwrap().unwrap().progress;
    assert_eq!(progress(task.id), 0);

    let updated = service.set_subtask_completed(draft.id, true).unwrap();
    assert!(updated.is_completed);
    assert_eq!(progress(task.id), 50);
    assert_eq!(progress(story.id), 25);
    assert_eq!(progress(epic.id), 12);

    service.set_subtask_completed(review.id, true).unwrap();
    assert_eq!(progress(task.id), 100);
    assert_eq!(progress(story.id), 50);
    assert_eq!(progress(epic.id), 25);

    service.set_subtask_completed(review.id, false).unwrap();
    assert_eq!(progress(task.id), 50);
}

#[test]
fn unknown_subtask_is_reported() {
    let conn = setup();
    let repo = SqliteHierarchyRepository::try_new(&conn).unwrap();
    let service = WorkItemService::new(repo);
    let missing = Uuid::new_v4();

    assert!(matches!(
        service.set_subtask_completed(missing, true).unwrap_err(),
        HierarchyError::SubtaskNotFound(id) if id == missing
    ));
    assert!(matches!(
        service.remove_subtask(missing).unwrap_err(),
        HierarchyError::SubtaskNotFound(id) if id == missing
    ));
}

#[test]
fn removing_subtasks_resequences_and_keeps_last_progress() {
    let conn = setup();
    let repo = SqliteHierarchyRepository::try_new(&conn).unwrap();
    let service = WorkItemService::new(repo);

    let story = service.create_story(None, "Api").unwrap();
    let task = service.create_task(Some(story.id), "Schema").unwrap();
    let first = service.add_subtask(task.id, "one").unwrap();
    let second = service.add_subtask(task.id, "two").unwrap();
    let third = service.add_subtask(task.id, "three").unwrap();
    service.set_subtask_completed(third.id, true).unwrap();

    service.remove_subtask(first.id).unwrap();
    let remaining = service.list_subtasks(task.id).unwrap();
    assert_eq!(
        remaining
            .iter()
            .map(|subtask| (subtask.id, subtask.sort_order))
            .collect::<Vec<_>>(),
        vec![(second.id, 0), (third.id, 1)]
    );
    let progress = |id| service.get_item(id).unwrap().unwrap().progress;
    assert_eq!(progress(task.id), 50);

    service.remove_subtask(second.id).unwrap();
    assert_eq!(progress(task.id), 100);

    // an empty subtask set never resets progress
    service.remove_subtask(third.id).unwrap();
    assert!(service.list_subtasks(task.id).unwrap().is_empty());
    assert_eq!(progress(task.id), 100);
}

#[test]
fn deleting_an_item_compacts_siblings_and_refreshes_parent() {
    let conn = setup();
    let repo = SqliteHierarchyRepository::try_new(&conn).unwrap();
    let service = WorkItemService::new(repo);

    let epic = service.create_epic("Release").unwrap();
    let story = service.create_story(Some(epic.id), "Api").unwrap();
    let done = service.create_task(Some(story.id), "Done").unwrap();
    let open = service.create_task(Some(story.id), "Open").unwrap();
    let last = service.create_task(Some(story.id), "Last").unwrap();
    let check = service.add_subtask(done.id, "check").unwrap();
    service.set_subtask_completed(check.id, true).unwrap();

    let progress = |id| service.get_item(id).unwrap().unwrap().progress;
    // tasks mean 100 / 3 = 33.3 -> 16
    assert_eq!(progress(story.id), 16);

    service.delete_item(open.id).unwrap();

    assert_eq!(service.get_item(open.id).unwrap(), None);
    let positions: Vec<_> = service
        .list_children(Some(story.id))
        .unwrap()
        .into_iter()
        .map(|node| (node.id, node.sort_order))
        .collect();
    assert_eq!(positions, vec![(done.id, Some(0)), (last.id, Some(1))]);
    // tasks mean 50 -> 25, epic 12
    assert_eq!(progress(story.id), 25);
    assert_eq!(progress(epic.id), 12);

    assert!(matches!(
        service.delete_item(open.id).unwrap_err(),
        HierarchyError::NotFound(id) if id == open.id
    ));
}

#[test]
fn rules_deserialize_with_defaults() {
    let rules: HierarchyRules =
        serde_json::from_str(r#"{"task_parent":"allow_standalone"}"#).unwrap();
    assert_eq!(rules.task_parent, TaskParentPolicy::AllowStandalone);
    assert_eq!(rules.recalculation, RecalculationPolicy::BestEffort);

    let json = serde_json::to_value(HierarchyRules::default()).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "task_parent": "require_story",
            "recalculation": "best_effort"
        })
    );
}
