//! Runner integration tests against in-memory SQLite.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use fayl::prelude::*;
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Default, Deserialize, PartialEq)]
struct User {
    id: i64,
    name: String,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
struct UserContact {
    id: i64,
    name: String,
    contact: Contact,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
struct Contact {
    email: Option<String>,
}

#[derive(Serialize)]
struct NewUser<'a> {
    id: i64,
    #[serde(rename = "name")]
    display_name: &'a str,
    email: Option<&'a str>,
}

#[tokio::test]
async fn test_get_by_id_into_struct() -> FaylResult<()> {
    let fayl = common::setup().await;
    common::insert(&fayl, 7, "Ann", None).await;

    let mut user = User::default();
    let result = fayl
        .run("users.get_by_id")
        .with_param("id", 7)
        .scan_struct(&mut user)
        .query(&Context::new())
        .await?;

    assert_eq!(user, User { id: 7, name: "Ann".into() });
    assert_eq!(result.rows, 1);
    assert!(result.pagination.is_none());
    Ok(())
}

#[tokio::test]
async fn test_single_struct_not_found() {
    let fayl = common::setup().await;

    let mut user = User::default();
    let err = fayl
        .run("users.get_by_id")
        .with_param("id", 404)
        .scan_struct(&mut user)
        .query(&Context::new())
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert!(err.to_string().contains("users.get_by_id"));
}

#[tokio::test]
async fn test_empty_struct_slice() -> FaylResult<()> {
    let fayl = common::setup().await;

    let mut users = vec![User::default()];
    fayl.run("users.list")
        .scan_structs(&mut users)
        .query(&Context::new())
        .await?;

    assert!(users.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_last_param_write_wins() -> FaylResult<()> {
    let fayl = common::setup().await;
    common::insert(&fayl, 1, "Ann", None).await;
    common::insert(&fayl, 2, "Bob", None).await;

    let mut user = User::default();
    fayl.run("users.get_by_id")
        .with_param("id", 1)
        .with_param("id", 2)
        .scan_struct(&mut user)
        .query(&Context::new())
        .await?;

    assert_eq!(user.name, "Bob");
    Ok(())
}

#[tokio::test]
async fn test_struct_params() -> FaylResult<()> {
    let fayl = common::setup().await;

    let result = fayl
        .run("users.insert")
        .with_params(&NewUser {
            id: 3,
            display_name: "Cid",
            email: Some("cid@example.com"),
        })
        .exec(&Context::new())
        .await?;
    assert_eq!(result.rows_affected, 1);

    let mut contact = UserContact::default();
    fayl.run("users.contact")
        .with_param("id", 3)
        .scan_struct(&mut contact)
        .query(&Context::new())
        .await?;

    assert_eq!(
        contact,
        UserContact {
            id: 3,
            name: "Cid".into(),
            contact: Contact {
                email: Some("cid@example.com".into())
            },
        }
    );
    Ok(())
}

#[tokio::test]
async fn test_map_params_merge() -> FaylResult<()> {
    let fayl = common::setup().await;

    let mut params = HashMap::new();
    params.insert("id", json!(4));
    params.insert("name", json!("Dee"));
    fayl.run("users.insert")
        .with_params(&params)
        .with_param("score", 5)
        .exec(&Context::new())
        .await?;

    let mut rows = Vec::new();
    fayl.run("users.list")
        .scan_maps(&mut rows)
        .query(&Context::new())
        .await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["score"], json!(5));
    assert_eq!(rows[0]["email"], json!(null));
    Ok(())
}

#[tokio::test]
async fn test_invalid_params_fail_before_io() {
    let fayl = common::setup().await;

    let err = fayl
        .run("users.insert")
        .with_params(&42)
        .with_param("id", 1)
        .with_param("name", "x")
        .exec(&Context::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FaylError::Bind { ref code, .. } if code == "users.insert"));

    let err = fayl
        .run("users.list")
        .with_params(&vec![1, 2])
        .query(&Context::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("params must be a map or a struct"));

    assert_eq!(common::count_users(&fayl).await, 0);
}

#[tokio::test]
async fn test_unknown_code() {
    let fayl = common::setup().await;

    let err = fayl.run("users.nope").exec(&Context::new()).await.unwrap_err();
    assert!(matches!(err, FaylError::UnknownQuery(ref code) if code == "users.nope"));
}

#[tokio::test]
async fn test_undefined_variable_is_compile_error() {
    let fayl = common::setup().await;

    let err = fayl
        .run("users.get_by_id")
        .query(&Context::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FaylError::Compile { ref code, .. } if code == "users.get_by_id"));
}

#[tokio::test]
async fn test_in_list_expansion() -> FaylResult<()> {
    let fayl = common::setup().await;
    for (id, name) in [(1, "Ann"), (2, "Bob"), (3, "Cid")] {
        common::insert(&fayl, id, name, None).await;
    }

    let mut users = Vec::<User>::new();
    fayl.run("users.by_ids")
        .with_param("ids", vec![3i64, 1])
        .scan_structs(&mut users)
        .query(&Context::new())
        .await?;

    let names: Vec<&str> = users.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, vec!["Ann", "Cid"]);
    Ok(())
}

#[tokio::test]
async fn test_blob_json_is_decoded() -> FaylResult<()> {
    let fayl = common::setup().await;
    common::insert(&fayl, 1, "Ann", None).await;
    common::insert(&fayl, 2, "Bob", None).await;

    for (id, profile) in [(1, br#"{"theme":"dark"}"#.to_vec()), (2, b"not json".to_vec())] {
        fayl.run("users.set_profile")
            .with_param("id", id)
            .with_param("profile", Value::Bytes(profile))
            .exec(&Context::new())
            .await?;
    }

    let mut row = Record::new();
    fayl.run("users.profile")
        .with_param("id", 1)
        .scan_map(&mut row)
        .query(&Context::new())
        .await?;
    assert_eq!(row["profile"], json!({"theme": "dark"}));

    fayl.run("users.profile")
        .with_param("id", 2)
        .scan_map(&mut row)
        .query(&Context::new())
        .await?;
    assert_eq!(row["profile"], json!("not json"));
    Ok(())
}

#[tokio::test]
async fn test_writer_destination() -> FaylResult<()> {
    let fayl = common::setup().await;
    common::insert(&fayl, 1, "Ann", Some(3)).await;

    let mut out: Vec<u8> = Vec::new();
    fayl.run("users.get_by_id")
        .with_param("id", 1)
        .scan_writer(&mut out)
        .query(&Context::new())
        .await?;

    let body: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(body, json!([{"id": 1, "name": "Ann"}]));
    Ok(())
}

#[tokio::test]
async fn test_order_by_without_pagination() -> FaylResult<()> {
    let fayl = common::setup().await;
    for (id, name) in [(1, "Cid"), (2, "Ann"), (3, "Bob")] {
        common::insert(&fayl, id, name, None).await;
    }

    let mut users = Vec::<User>::new();
    let result = fayl
        .run("users.list")
        .with_order_by(["-name"])
        .scan_structs(&mut users)
        .query(&Context::new())
        .await?;

    let ids: Vec<i64> = users.iter().map(|u| u.id).collect();
    assert_eq!(ids, vec![1, 3, 2]);
    assert!(result.pagination.is_none());
    Ok(())
}

#[tokio::test]
async fn test_order_by_column_outside_projection() -> FaylResult<()> {
    let fayl = common::setup().await;
    for (id, score) in [(1, 30), (2, 10), (3, 20)] {
        common::insert(&fayl, id, &format!("user{}", id), Some(score)).await;
    }

    let mut users = Vec::<User>::new();
    fayl.run("users.by_ids")
        .with_param("ids", vec![1i64, 2, 3])
        .with_order_by(["-name"])
        .scan_structs(&mut users)
        .query(&Context::new())
        .await?;
    let ids: Vec<i64> = users.iter().map(|u| u.id).collect();
    assert_eq!(ids, vec![3, 2, 1]);

    // users.names does not select `score`.
    let mut users = Vec::<User>::new();
    fayl.run("users.names")
        .with_order_by(["-users.score"])
        .scan_structs(&mut users)
        .query(&Context::new())
        .await?;
    let ids: Vec<i64> = users.iter().map(|u| u.id).collect();
    assert_eq!(ids, vec![1, 3, 2]);
    Ok(())
}

#[tokio::test]
async fn test_integer_booleans_into_struct() -> FaylResult<()> {
    #[derive(Debug, Deserialize, PartialEq)]
    struct Flag {
        id: i64,
        active: Option<bool>,
        first: bool,
    }

    let fayl = common::setup().await;
    common::insert(&fayl, 1, "Ann", Some(20)).await;
    common::insert(&fayl, 2, "Bob", Some(5)).await;
    common::insert(&fayl, 3, "Cid", None).await;

    let mut flags = Vec::<Flag>::new();
    fayl.run("users.flags")
        .scan_structs(&mut flags)
        .query(&Context::new())
        .await?;

    assert_eq!(
        flags,
        vec![
            Flag { id: 1, active: Some(true), first: true },
            Flag { id: 2, active: Some(false), first: false },
            Flag { id: 3, active: None, first: false },
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_exec_and_drain() -> FaylResult<()> {
    let fayl = common::setup().await;
    common::insert(&fayl, 1, "Ann", None).await;
    common::insert(&fayl, 2, "Bob", None).await;

    // No destination: rows are read and dropped.
    let result = fayl.run("users.list").query(&Context::new()).await?;
    assert_eq!(result, QueryResult::default());

    let deleted = fayl.run("users.delete_all").exec(&Context::new()).await?;
    assert_eq!(deleted.rows_affected, 2);
    assert_eq!(common::count_users(&fayl).await, 0);
    Ok(())
}

#[tokio::test]
async fn test_dry_run_plan() {
    let fayl = common::setup().await;

    let plan = fayl
        .run("users.list")
        .with_param("min_id", 2)
        .with_order_by(["id"])
        .with_pagination(Pagination::offset(0, 5))
        .plan()
        .unwrap();

    assert!(plan.statement.sql.starts_with("SELECT id, name, email, score"));
    assert!(plan.statement.sql.ends_with("LIMIT 5 OFFSET 0"));
    assert_eq!(plan.statement.args, vec![Value::Int(2)]);
    assert!(plan.count_statement().is_some());
}

#[tokio::test]
async fn test_expired_deadline_cancels_calls() -> FaylResult<()> {
    let fayl = common::setup().await;
    common::insert(&fayl, 1, "Ann", None).await;
    let expired = Context::new().with_timeout(Duration::ZERO);

    let mut users = Vec::<User>::new();
    let err = fayl
        .run("users.list")
        .scan_structs(&mut users)
        .query(&expired)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(users.is_empty());

    let err = fayl.run("users.delete_all").exec(&expired).await.unwrap_err();
    assert!(matches!(err, FaylError::Cancelled(ref code) if code == "users.delete_all"));

    // The pool is still usable and nothing was deleted.
    fayl.run("users.list")
        .scan_structs(&mut users)
        .query(&Context::new().with_timeout(Duration::from_secs(10)))
        .await?;
    assert_eq!(users, vec![User { id: 1, name: "Ann".into() }]);
    Ok(())
}

#[tokio::test]
async fn test_request_ids_on_spans() {
    use std::sync::{Arc, Mutex};

    use tracing::field::{Field, Visit};
    use tracing::span::{Attributes, Id, Record as SpanRecord};
    use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
    use tracing_subscriber::Layer;

    #[derive(Clone, Default)]
    struct Fields(Arc<Mutex<Vec<(String, String, String)>>>);

    struct Collect<'a>(&'a str, &'a Fields);

    impl Visit for Collect<'_> {
        fn record_str(&mut self, field: &Field, value: &str) {
            let Collect(span, fields) = self;
            fields.0.lock().unwrap().push((span.to_string(), field.name().to_string(), value.to_string()));
        }

        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            self.record_str(field, &format!("{:?}", value));
        }
    }

    impl<S: tracing::Subscriber + for<'l> tracing_subscriber::registry::LookupSpan<'l>> Layer<S> for Fields {
        fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: LayerContext<'_, S>) {
            attrs.record(&mut Collect(attrs.metadata().name(), self));
        }

        fn on_record(&self, id: &Id, values: &SpanRecord<'_>, ctx: LayerContext<'_, S>) {
            let name = ctx.span(id).map(|span| span.name()).unwrap_or("?");
            values.record(&mut Collect(name, self));
        }
    }

    let fields = Fields::default();
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(fields.clone()));

    let fayl = common::setup().await;
    let ctx = Context::new().with_request_id("req-42").with_correlation_id("corr-7");
    fayl.run("users.list").query(&ctx).await.unwrap();
    fayl.with_transaction(&ctx, |ctx, tx| async move { tx.run("users.count").query(&ctx).await.map(drop) })
        .await
        .unwrap();

    let seen = fields.0.lock().unwrap().clone();
    for span in ["query", "transaction"] {
        for (field, value) in [("request_id", "req-42"), ("correlation_id", "corr-7")] {
            assert!(
                seen.iter().any(|(s, f, v)| s == span && f == field && v == value),
                "{} missing {}={} in {:?}",
                span,
                field,
                value,
                seen
            );
        }
    }
    assert!(seen.iter().any(|(s, f, v)| s == "query" && f == "code" && v == "users.list"));
}
