//! QuerySet and Manager behavior against an in-memory SQLite database.

mod common;

use std::time::Duration;

use djinn_orm::{
    count_all, max, record, sum, Criteria, Instance, OrmError, Registry, Row, SqlValue,
    ValidationError,
};
use futures::TryStreamExt;

async fn seed() -> (Registry, Instance) {
    let registry = common::blog().await;
    let author = registry
        .manager("User")
        .unwrap()
        .create(record! { "username" => "alice" })
        .await
        .unwrap();

    let posts = registry.manager("Post").unwrap();
    for (title, status, views) in [
        ("First", "published", 10),
        ("Second", "published", 30),
        ("Third", "pending", 5),
    ] {
        posts
            .create(record! {
                "title" => title,
                "status" => status,
                "views" => views,
                "author" => author.pk(),
            })
            .await
            .unwrap();
    }
    (registry, author)
}

fn titles(rows: &[Row]) -> Vec<String> {
    rows.iter()
        .map(|row| row.get("title").and_then(SqlValue::as_str).unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_create_applies_defaults() {
    let (registry, author) = seed().await;
    let posts = registry.manager("Post").unwrap();

    let post = posts
        .create(record! { "title" => "Draft", "author_id" => author.pk() })
        .await
        .unwrap();

    assert_eq!(post.get("status"), Some(&SqlValue::Text(String::from("pending"))));
    assert_eq!(post.get("views"), Some(&SqlValue::Int(0)));
    assert!(post.get("created_at").and_then(SqlValue::as_str).is_some());
    assert_eq!(post.get("created_at"), post.get("updated_at"));
    assert_eq!(post.pk(), &SqlValue::Int(4));

    let users = registry.manager("User").unwrap();
    assert_eq!(author.get("is_active"), Some(&SqlValue::Int(1)));
    assert_eq!(users.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_create_validates_before_insert() {
    let (registry, author) = seed().await;
    let posts = registry.manager("Post").unwrap();

    let err = posts
        .create(record! { "title" => "Bad", "status" => "deleted", "author" => author.pk() })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrmError::Validation(ValidationError::NotInChoices { .. })
    ));

    let err = posts
        .create(record! { "title" => "x".repeat(201), "author" => author.pk() })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrmError::Validation(ValidationError::TooLong { max_length: 200, .. })
    ));

    let err = posts.create(record! { "title" => "Orphan" }).await.unwrap_err();
    assert!(matches!(
        err,
        OrmError::Validation(ValidationError::NullNotAllowed { .. })
    ));

    assert_eq!(posts.count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_chaining_is_immutable() {
    let (registry, _) = seed().await;
    let posts = registry.manager("Post").unwrap();

    let published = posts.filter(Criteria::new().eq("status", "published"));
    let popular = published.filter(Criteria::new().gt("views", 20));
    let ordered = published.order_by(["-views"]).limit(1);

    assert_eq!(published.count().await.unwrap(), 2);
    assert_eq!(popular.count().await.unwrap(), 1);
    assert_eq!(titles(&ordered.all().await.unwrap()), ["Second"]);
    assert_eq!(titles(&published.order_by(["title"]).all().await.unwrap()), ["First", "Second"]);
}

#[tokio::test]
async fn test_exclude_and_ranges() {
    let (registry, _) = seed().await;
    let posts = registry.manager("Post").unwrap();

    let rows = posts
        .exclude(Criteria::new().eq("status", "pending"))
        .filter(Criteria::new().gte("views", 10).lt("views", 30))
        .all()
        .await
        .unwrap();
    assert_eq!(titles(&rows), ["First"]);

    let rows = posts
        .filter(Criteria::new().ne("status", "published"))
        .all()
        .await
        .unwrap();
    assert_eq!(titles(&rows), ["Third"]);
}

#[tokio::test]
async fn test_in_list_edges() {
    let (registry, _) = seed().await;
    let posts = registry.manager("Post").unwrap();

    let some = posts.filter(Criteria::new().in_list("title", ["First", "Third"]));
    assert_eq!(some.count().await.unwrap(), 2);

    let nothing = Criteria::new().in_list("title", Vec::<String>::new());
    assert_eq!(posts.filter(nothing.clone()).count().await.unwrap(), 0);
    assert_eq!(posts.exclude(nothing).count().await.unwrap(), 3);

    let not_in = posts.exclude(Criteria::new().in_list("title", ["First"]));
    assert_eq!(not_in.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_get_cardinality() {
    let (registry, _) = seed().await;
    let posts = registry.manager("Post").unwrap();

    let one = posts.get(Criteria::new().eq("title", "Second")).await.unwrap();
    assert_eq!(one.unwrap().get("views"), Some(&SqlValue::Int(30)));

    let none = posts.get(Criteria::new().eq("title", "Missing")).await.unwrap();
    assert!(none.is_none());

    let err = posts
        .get(Criteria::new().eq("status", "published"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::MultipleObjectsReturned { .. }));
}

#[tokio::test]
async fn test_first_last_and_exists() {
    let (registry, _) = seed().await;
    let posts = registry.manager("Post").unwrap();

    let first = posts.first().await.unwrap().unwrap();
    let last = posts.last().await.unwrap().unwrap();
    assert_eq!(first.get("title"), Some(&SqlValue::Text(String::from("First"))));
    assert_eq!(last.get("title"), Some(&SqlValue::Text(String::from("Third"))));

    let by_views = posts.order_by(["views"]);
    let lowest = by_views.first().await.unwrap().unwrap();
    let highest = by_views.last().await.unwrap().unwrap();
    assert_eq!(lowest.get("views"), Some(&SqlValue::Int(5)));
    assert_eq!(highest.get("views"), Some(&SqlValue::Int(30)));

    assert!(posts.exists().await.unwrap());
    assert!(!posts.filter(Criteria::new().eq("status", "archived")).exists().await.unwrap());
    assert!(!posts.queryset().none().exists().await.unwrap());
}

#[tokio::test]
async fn test_update_restamps_auto_now() {
    let (registry, _) = seed().await;
    let posts = registry.manager("Post").unwrap();
    let before = posts.get(Criteria::new().eq("title", "Third")).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    let updated = posts
        .update(
            Criteria::new().eq("title", "Third"),
            record! { "status" => "published" },
        )
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let after = posts.get(Criteria::new().eq("title", "Third")).await.unwrap().unwrap();
    assert_eq!(after.get("status"), Some(&SqlValue::Text(String::from("published"))));
    assert_eq!(after.get("created_at"), before.get("created_at"));
    assert_ne!(after.get("updated_at"), before.get("updated_at"));

    let err = posts
        .update(Criteria::new().eq("title", "Third"), record! { "status" => "gone" })
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::Validation(_)));
}

#[tokio::test]
async fn test_update_merges_queryset_filters() {
    let (registry, _) = seed().await;
    let posts = registry.manager("Post").unwrap();

    let updated = posts
        .filter(Criteria::new().eq("status", "published"))
        .update(Criteria::new().gt("views", 20), record! { "views" => 0 })
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let total = posts.aggregate([("total", sum("views"))]).await.unwrap();
    assert_eq!(total["total"], SqlValue::Int(15));
}

#[tokio::test]
async fn test_delete_requires_criteria() {
    let (registry, _) = seed().await;
    let posts = registry.manager("Post").unwrap();

    let err = posts.delete(Criteria::new()).await.unwrap_err();
    assert!(matches!(err, OrmError::UnsafeOperation(_)));
    assert_eq!(posts.count().await.unwrap(), 3);

    let deleted = posts
        .filter(Criteria::new().eq("status", "published"))
        .delete(Criteria::new())
        .await
        .unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(posts.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_update_or_create_and_get_or_create() {
    let (registry, _) = seed().await;
    let users = registry.manager("User").unwrap();

    let (bob, created) = users
        .get_or_create(Criteria::new().eq("username", "bob"), record! { "is_active" => false })
        .await
        .unwrap();
    assert!(created);
    assert_eq!(bob.get("is_active"), Some(&SqlValue::Int(0)));

    let (again, created) = users
        .get_or_create(Criteria::new().eq("username", "bob"), record! {})
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(again.pk(), bob.pk());

    let (bob, created) = users
        .update_or_create(Criteria::new().eq("username", "bob"), record! { "is_active" => true })
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(bob.get("is_active"), Some(&SqlValue::Int(1)));

    let (carol, created) = users
        .update_or_create(Criteria::new().eq("username", "carol"), record! {})
        .await
        .unwrap();
    assert!(created);
    assert_eq!(carol.get("username"), Some(&SqlValue::Text(String::from("carol"))));
    assert_eq!(users.count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_projections_and_aggregates() {
    let (registry, _) = seed().await;
    let posts = registry.manager("Post").unwrap();

    let flat = posts
        .order_by(["title"])
        .values_list_flat("title")
        .all()
        .await
        .unwrap();
    assert_eq!(
        flat,
        [
            Row::Scalar(SqlValue::Text(String::from("First"))),
            Row::Scalar(SqlValue::Text(String::from("Second"))),
            Row::Scalar(SqlValue::Text(String::from("Third"))),
        ]
    );

    let grouped = posts
        .values(["status"])
        .annotate("n", count_all())
        .group_by(["status"])
        .order_by(["status"])
        .all()
        .await
        .unwrap();
    assert_eq!(grouped.len(), 2);
    assert_eq!(grouped[0].get("status"), Some(&SqlValue::Text(String::from("pending"))));
    assert_eq!(grouped[1].get("n"), Some(&SqlValue::Int(2)));

    let stats = posts
        .aggregate([("total", sum("views")), ("top", max("views"))])
        .await
        .unwrap();
    assert_eq!(stats["total"], SqlValue::Int(45));
    assert_eq!(stats["top"], SqlValue::Int(30));

    let statuses = posts.values_list(["status"]).distinct();
    assert_eq!(statuses.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_set_operations() {
    let (registry, _) = seed().await;
    let posts = registry.manager("Post").unwrap();

    let published = posts.filter(Criteria::new().eq("status", "published"));
    let popular = posts.filter(Criteria::new().gt("views", 20));

    assert_eq!(published.union(&popular, false).count().await.unwrap(), 2);
    assert_eq!(published.union(&popular, true).count().await.unwrap(), 3);
    assert_eq!(published.intersect(&popular, false).count().await.unwrap(), 1);

    let rows = published.except(&popular, false).all().await.unwrap();
    assert_eq!(titles(&rows), ["First"]);
}

#[tokio::test]
async fn test_iterator_batches() {
    let (registry, author) = seed().await;
    let posts = registry.manager("Post").unwrap();
    let extra = (0..4)
        .map(|i| record! { "title" => format!("Extra {i}"), "author" => author.pk() })
        .collect();
    posts.bulk_create(extra).await.unwrap();

    let rows: Vec<Row> = posts.iterator(3).unwrap().try_collect().await.unwrap();
    assert_eq!(rows.len(), 7);
    assert_eq!(rows[0].get("title"), Some(&SqlValue::Text(String::from("First"))));

    let windowed: Vec<Row> = posts
        .queryset()
        .offset(1)
        .limit(4)
        .iterator(3)
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(titles(&windowed), ["Second", "Third", "Extra 0", "Extra 1"]);
}

#[tokio::test]
async fn test_earliest_latest_and_in_bulk() {
    let (registry, _) = seed().await;
    let posts = registry.manager("Post").unwrap();

    let earliest = posts.earliest(Some("views")).await.unwrap().unwrap();
    assert_eq!(earliest.get("title"), Some(&SqlValue::Text(String::from("Third"))));
    let latest = posts.latest(None).await.unwrap().unwrap();
    assert_eq!(latest.pk(), &SqlValue::Int(3));

    let published = posts.filter(Criteria::new().eq("status", "published"));
    let by_title = published.in_bulk(Some("title")).await.unwrap();
    assert_eq!(by_title.keys().collect::<Vec<_>>(), ["First", "Second"]);
    assert_eq!(by_title["Second"].get("views"), Some(&SqlValue::Int(30)));

    let by_pk = posts.in_bulk(None).await.unwrap();
    assert_eq!(by_pk.len(), 3);
    assert!(by_pk.contains_key("1"));

    assert!(matches!(
        posts.in_bulk(Some("nope")).await,
        Err(OrmError::InvalidField { .. })
    ));
}

#[tokio::test]
async fn test_only_and_defer_load_partial_instances() {
    let (registry, _) = seed().await;
    let posts = registry.manager("Post").unwrap();

    let row = posts.only(["title"]).first().await.unwrap().unwrap();
    let loaded = row.into_instance().unwrap();
    assert_eq!(
        loaded.record().keys().collect::<Vec<_>>(),
        ["id", "title"]
    );

    let rows = posts.defer(["created_at", "updated_at"]).all().await.unwrap();
    let instance = rows[0].as_instance().unwrap();
    assert!(instance.get("created_at").is_none());
    assert_eq!(instance.get("views"), Some(&SqlValue::Int(10)));
}

#[tokio::test]
async fn test_bulk_update_writes_listed_fields() {
    let (registry, _) = seed().await;
    let posts = registry.manager("Post").unwrap();

    let mut instances = posts.all().await.unwrap();
    for instance in &mut instances {
        instance.set("views", 100);
        instance.set("title", "ignored");
    }
    let updated = posts.bulk_update(&instances, &["views"]).await.unwrap();
    assert_eq!(updated, 3);

    let total = posts.aggregate([("total", sum("views"))]).await.unwrap();
    assert_eq!(total["total"], SqlValue::Int(300));
    let rows = posts.queryset().order_by(["id"]).all().await.unwrap();
    assert_eq!(titles(&rows), ["First", "Second", "Third"]);
}

#[tokio::test]
async fn test_instance_save_and_delete() {
    let (registry, _) = seed().await;
    let posts = registry.manager("Post").unwrap();

    let mut post = posts.first().await.unwrap().unwrap();
    post.set("title", "Renamed");
    let saved = posts.save(&post).await.unwrap();
    assert_eq!(saved.pk(), post.pk());
    assert_eq!(saved.get("title"), Some(&SqlValue::Text(String::from("Renamed"))));
    assert_eq!(posts.count().await.unwrap(), 3);

    // A partially loaded instance only writes what it holds.
    let mut partial = posts
        .only(["views"])
        .get(Criteria::new().eq("id", 2))
        .await
        .unwrap()
        .and_then(Row::into_instance)
        .unwrap();
    partial.set("views", 31);
    let saved = posts.save(&partial).await.unwrap();
    assert_eq!(saved.get("title"), Some(&SqlValue::Text(String::from("Second"))));
    assert_eq!(saved.get("views"), Some(&SqlValue::Int(31)));

    let tags = registry.manager("Tag").unwrap();
    let mut fresh = Instance::new(common::model(&registry, "Tag"), record! {});
    fresh.set("name", "rust");
    let stored = tags.save(&fresh).await.unwrap();
    assert_eq!(stored.pk(), &SqlValue::Int(1));
    assert_eq!(tags.count().await.unwrap(), 1);

    assert!(posts.delete_instance(&saved).await.unwrap());
    assert!(!posts.delete_instance(&saved).await.unwrap());
    assert_eq!(posts.count().await.unwrap(), 2);

    assert!(matches!(
        posts.delete_instance(&fresh).await,
        Err(OrmError::QueryError(_))
    ));
}

#[tokio::test]
async fn test_explain_reports_plan() {
    let (registry, _) = seed().await;
    let plan = registry
        .manager("Post")
        .unwrap()
        .filter(Criteria::new().eq("status", "published"))
        .explain()
        .await
        .unwrap();
    assert!(!plan.is_empty());
    assert!(plan
        .iter()
        .any(|step| step.get("detail").and_then(SqlValue::as_str).is_some_and(|d| d.contains("posts"))));
}
