//! Reverse foreign keys and many-to-many traversal.

mod common;

use djinn_orm::{record, Criteria, OrmError, Related, SqlValue};

#[tokio::test]
async fn test_reverse_foreign_key() {
    let registry = common::blog().await;
    let users = registry.manager("User").unwrap();
    let posts = registry.manager("Post").unwrap();

    let alice = users.create(record! { "username" => "alice" }).await.unwrap();
    let bob = users.create(record! { "username" => "bob" }).await.unwrap();
    for (title, author) in [("a1", &alice), ("a2", &alice), ("b1", &bob)] {
        posts
            .create(record! { "title" => title, "author" => author.pk() })
            .await
            .unwrap();
    }

    let relations = registry.relations().unwrap();
    let written = relations
        .related(&alice, "posts_set")
        .unwrap()
        .into_queryset()
        .unwrap();
    assert_eq!(written.count().await.unwrap(), 2);

    let published = written.filter(Criteria::new().eq("title", "a2"));
    assert_eq!(published.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_many_to_many_traversal() {
    let registry = common::blog().await;
    let users = registry.manager("User").unwrap();
    let tags = registry.manager("Tag").unwrap();
    let posts = registry.manager("Post").unwrap();

    let alice = users.create(record! { "username" => "alice" }).await.unwrap();
    let post = posts
        .create(record! { "title" => "Hello", "author" => alice.pk() })
        .await
        .unwrap();
    let rust = tags.create(record! { "name" => "rust" }).await.unwrap();
    let sql = tags.create(record! { "name" => "sql" }).await.unwrap();

    let relations = registry.relations().unwrap();
    let Related::Through(post_tags) = relations.related(&post, "tags").unwrap() else {
        panic!("tags should be a many-to-many relation");
    };
    assert_eq!(post_tags.join_table(), "posts_tags");

    post_tags.add(rust.pk()).await.unwrap();
    post_tags.add(sql.pk()).await.unwrap();
    post_tags.add(rust.pk()).await.unwrap();
    assert_eq!(post_tags.count().await.unwrap(), 2);

    let names: Vec<_> = post_tags
        .all()
        .await
        .unwrap()
        .iter()
        .map(|tag| tag.get("name").cloned())
        .collect();
    assert_eq!(
        names,
        [
            Some(SqlValue::Text(String::from("rust"))),
            Some(SqlValue::Text(String::from("sql"))),
        ]
    );

    let tagged = relations
        .related(&rust, "posts_set")
        .unwrap()
        .into_accessor()
        .unwrap();
    let tagged_posts = tagged.all().await.unwrap();
    assert_eq!(tagged_posts.len(), 1);
    assert_eq!(tagged_posts[0].pk(), post.pk());

    assert!(post_tags.remove(rust.pk()).await.unwrap());
    assert!(!post_tags.remove(rust.pk()).await.unwrap());
    assert!(tagged.all().await.unwrap().is_empty());

    assert_eq!(post_tags.clear().await.unwrap(), 1);
    assert_eq!(post_tags.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_relation_name() {
    let registry = common::blog().await;
    let alice = registry
        .manager("User")
        .unwrap()
        .create(record! { "username" => "alice" })
        .await
        .unwrap();

    let relations = registry.relations().unwrap();
    let err = relations.related(&alice, "comments_set").unwrap_err();
    assert!(matches!(err, OrmError::UnknownRelation { table, .. } if table == "users"));
}
