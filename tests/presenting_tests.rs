//! Integration tests for the presenting pipeline
//!
//! These tests run full requests against an in-memory SQLite database:
//! - Pagination, default ordering and the response envelope
//! - Filters, `only` and include allowlisting
//! - Optional and conditional fields, batched lookups
//! - Search capability failures

#![cfg(feature = "sqlite")]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use brainstem::{
    AssociationOptions, Attributes, Error, FieldOptions, FieldType, Filter, ModelClass, Presenter,
    PresenterCollection, PresentingOptions, Record, Related, RequestParams, Schema, SearchOptions,
    SearchResults, SqliteSource, Value,
};
use serde_json::{Value as JsonValue, json};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

// ============================================================================
// Fixtures
// ============================================================================

/// Six workspaces owned alternately by users 1 and 2, with tasks on
/// workspaces 1, 2 and 6. Later ids were updated more recently.
async fn pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    for statement in [
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
        "CREATE TABLE workspaces (id INTEGER PRIMARY KEY, title TEXT, owner_id INTEGER, created_on DATE, updated_at DATETIME)",
        "CREATE TABLE tasks (id INTEGER PRIMARY KEY, workspace_id INTEGER, title TEXT, done BOOLEAN)",
        "INSERT INTO users (id, name) VALUES (1, 'ada'), (2, 'grace')",
        "INSERT INTO tasks (id, workspace_id, title, done) VALUES (1, 1, 'plan', 0), (2, 1, 'build', 1), (3, 2, 'ship', 0), (4, 6, 'review', 0)",
    ] {
        sqlx::query(statement).execute(&pool).await.unwrap();
    }

    for id in 1..=6i64 {
        sqlx::query(
            "INSERT INTO workspaces (id, title, owner_id, created_on, updated_at) VALUES (?1, 'ws ' || ?1, ?2, '2024-01-0' || ?1, '2024-03-0' || ?1 || ' 12:00:00')",
        )
        .bind(id)
        .bind(if id % 2 == 0 { 2i64 } else { 1i64 })
        .execute(&pool)
        .await
        .unwrap();
    }

    pool
}

fn schema() -> Schema {
    Schema::new()
        .with(ModelClass::new("User", "users"))
        .with(
            ModelClass::new("Workspace", "workspaces")
                .has_many("tasks", "Task", "workspace_id")
                .belongs_to("owner", "User", "owner_id"),
        )
        .with(ModelClass::new("Task", "tasks").belongs_to("workspace", "Workspace", "workspace_id"))
}

fn workspace_presenter(lookups: Arc<AtomicUsize>) -> Presenter {
    Presenter::builder()
        .presents("Workspace")
        .sort_order("updated_at", "workspaces.updated_at")
        .sort_order("title", "workspaces.title")
        .default_sort_order("updated_at:desc")
        .filter(Filter::new("owner_id"))
        .filter(Filter::with("has_tasks", |scope, value, _| {
            let exists = "EXISTS (SELECT 1 FROM tasks WHERE tasks.workspace_id = workspaces.id)";
            if value.is_truthy() {
                scope.where_raw(exists, Vec::new())
            } else {
                scope.where_raw(format!("NOT {}", exists), Vec::new())
            }
        }))
        .conditionals(|c| {
            c.request("is_admin", |helpers| helpers.params().get("admin") == Some("true"));
            c.model("owned_by_ada", |model, _| {
                model.attribute("owner_id").and_then(Value::as_i64) == Some(1)
            });
        })
        .fields(|f| {
            f.field("title", FieldType::String, FieldOptions::new())
                .field("created_on", FieldType::Date, FieldOptions::new())
                .field("updated_at", FieldType::DateTime, FieldOptions::new())
                .field(
                    "description",
                    FieldType::String,
                    FieldOptions::new()
                        .dynamic(|model, _| Value::from(format!("workspace number {}", model.id())))
                        .optional(),
                )
                .field(
                    "audit_token",
                    FieldType::String,
                    FieldOptions::new().ambient(|_| Value::from("secret")).when("is_admin"),
                )
                .field(
                    "ada_badge",
                    FieldType::Boolean,
                    FieldOptions::new().dynamic(|_, _| Value::Bool(true)).when("owned_by_ada"),
                )
                .field(
                    "score",
                    FieldType::Integer,
                    FieldOptions::new().lookup(move |models, _| {
                        lookups.fetch_add(1, Ordering::SeqCst);
                        Value::Map(
                            models
                                .iter()
                                .map(|model| (model.id().to_string(), Value::Int(model.id() * 10)))
                                .collect(),
                        )
                    }),
                );
        })
        .associations(|a| {
            a.association("tasks", "Task", AssociationOptions::new())
                .association("owner", "User", AssociationOptions::new());
        })
        .build()
        .unwrap()
}

fn task_presenter() -> Presenter {
    Presenter::builder()
        .presents("Task")
        .fields(|f| {
            f.field("title", FieldType::String, FieldOptions::new())
                .field("done", FieldType::Boolean, FieldOptions::new())
                .field(
                    "notes",
                    FieldType::String,
                    FieldOptions::new().dynamic(|model, _| Value::from(format!("task {}", model.id()))).optional(),
                );
        })
        .associations(|a| {
            a.association("workspace", "Workspace", AssociationOptions::new());
        })
        .build()
        .unwrap()
}

fn user_presenter() -> Presenter {
    Presenter::builder()
        .presents("User")
        .fields(|f| {
            f.field("name", FieldType::String, FieldOptions::new());
        })
        .build()
        .unwrap()
}

fn collection_with(workspace: Presenter) -> PresenterCollection {
    let collection = PresenterCollection::new("v1", schema())
        .with(workspace)
        .unwrap()
        .with(task_presenter())
        .unwrap()
        .with(user_presenter())
        .unwrap();
    collection.validate().unwrap();
    collection
}

fn collection() -> PresenterCollection {
    collection_with(workspace_presenter(Arc::new(AtomicUsize::new(0))))
}

async fn present(collection: &PresenterCollection, query: &str) -> JsonValue {
    let source = SqliteSource::new(pool().await);
    collection
        .presenting("workspaces", PresentingOptions::new(RequestParams::from_query(query)), &source)
        .await
        .unwrap()
}

fn ids(response: &JsonValue, key: &str) -> Vec<String> {
    response[key]
        .as_array()
        .unwrap_or_else(|| panic!("missing `{}` in {}", key, response))
        .iter()
        .map(|record| record["id"].as_str().unwrap().to_string())
        .collect()
}

// ============================================================================
// Pagination and ordering
// ============================================================================

mod pagination {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_second_page_uses_default_sort_order() {
        let response = present(&collection(), "per_page=2&page=2").await;

        assert_eq!(ids(&response, "workspaces"), vec!["4", "3"]);
        assert_eq!(response["count"], json!(6));
        assert_eq!(
            response["meta"],
            json!({"count": 6, "page_count": 3, "page_number": 2, "page_size": 2})
        );
    }

    #[tokio::test]
    async fn test_explicit_order() {
        let response = present(&collection(), "order=title:asc&per_page=3").await;
        assert_eq!(ids(&response, "workspaces"), vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_unknown_order_falls_back_to_default() {
        let response = present(&collection(), "order=popularity:asc&per_page=1").await;
        assert_eq!(ids(&response, "workspaces"), vec!["6"]);
    }

    #[tokio::test]
    async fn test_empty_result_meta() {
        let response = present(&collection(), "owner_id=99").await;

        assert_eq!(ids(&response, "workspaces"), Vec::<String>::new());
        assert_eq!(
            response["meta"],
            json!({"count": 0, "page_count": 0, "page_number": 0, "page_size": 20})
        );
    }

    #[tokio::test]
    async fn test_max_per_page_and_as_key() {
        let source = SqliteSource::new(pool().await);
        let options = PresentingOptions::new(RequestParams::from_query("per_page=50"))
            .max_per_page(4)
            .as_key("spaces");
        let response = collection().presenting("Workspace", options, &source).await.unwrap();

        assert_eq!(ids(&response, "spaces"), vec!["6", "5", "4", "3"]);
        assert!(response.get("workspaces").is_none());
        assert_eq!(response["meta"]["page_size"], json!(4));
    }
}

// ============================================================================
// Filters and `only`
// ============================================================================

mod filtering {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_top_level_filter_param() {
        let response = present(&collection(), "owner_id=2").await;
        assert_eq!(ids(&response, "workspaces"), vec!["6", "4", "2"]);
        assert_eq!(response["count"], json!(3));
    }

    #[tokio::test]
    async fn test_custom_filter_block() {
        let response = present(&collection(), "filters=has_tasks:true").await;
        assert_eq!(ids(&response, "workspaces"), vec!["6", "2", "1"]);

        let response = present(&collection(), "filters=has_tasks:false,owner_id:1").await;
        assert_eq!(ids(&response, "workspaces"), vec!["5", "3"]);
        assert_eq!(response["count"], json!(2));
    }

    #[tokio::test]
    async fn test_undeclared_filter_is_ignored() {
        let response = present(&collection(), "filters=title:ws%201").await;
        assert_eq!(response["count"], json!(6));
    }

    #[tokio::test]
    async fn test_only_keeps_valid_ids() {
        let response = present(&collection(), "only=5,abc,3").await;
        assert_eq!(ids(&response, "workspaces"), vec!["5", "3"]);
        assert_eq!(response["count"], json!(2));
    }

    #[tokio::test]
    async fn test_only_without_valid_ids_matches_nothing() {
        let response = present(&collection(), "only=abc&per_page=2").await;
        assert_eq!(ids(&response, "workspaces"), Vec::<String>::new());
        assert_eq!(response["count"], json!(0));
    }
}

// ============================================================================
// Rendering
// ============================================================================

mod rendering {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_dates_times_and_foreign_keys() {
        let response = present(&collection(), "only=4").await;
        let workspace = &response["workspaces"][0];

        assert_eq!(workspace["id"], json!("4"));
        assert_eq!(workspace["title"], json!("ws 4"));
        assert_eq!(workspace["created_on"], json!("2024-01-04"));
        assert_eq!(workspace["updated_at"], json!(1709553600));
        assert_eq!(workspace["owner_id"], json!("2"));
        assert!(workspace.get("task_ids").is_none());
    }

    #[tokio::test]
    async fn test_optional_and_conditional_fields() {
        let response = present(&collection(), "only=3,4").await;
        let plain = &response["workspaces"];
        assert!(plain[0].get("description").is_none());
        assert!(plain[0].get("audit_token").is_none());
        assert_eq!(plain[1]["ada_badge"], json!(true));
        assert!(plain[0].get("ada_badge").is_none());

        let response = present(&collection(), "only=3,4&fields=description&admin=true").await;
        let detailed = &response["workspaces"];
        assert_eq!(detailed[0]["description"], json!("workspace number 4"));
        assert_eq!(detailed[0]["audit_token"], json!("secret"));
        assert_eq!(detailed[1]["audit_token"], json!("secret"));
    }

    #[tokio::test]
    async fn test_lookup_runs_once_per_request() {
        let lookups = Arc::new(AtomicUsize::new(0));
        let collection = collection_with(workspace_presenter(Arc::clone(&lookups)));

        let response = present(&collection, "").await;
        let scores: Vec<JsonValue> = response["workspaces"]
            .as_array()
            .unwrap()
            .iter()
            .map(|workspace| workspace["score"].clone())
            .collect();

        assert_eq!(scores, vec![json!(60), json!(50), json!(40), json!(30), json!(20), json!(10)]);
        assert_eq!(lookups.load(Ordering::SeqCst), 1);
    }
}

// ============================================================================
// Includes
// ============================================================================

mod includes {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_declared_include_is_bucketed() {
        let response = present(&collection(), "include=tasks,secrets").await;

        let mut task_ids = ids(&response, "tasks");
        task_ids.sort();
        assert_eq!(task_ids, vec!["1", "2", "3", "4"]);
        assert!(response.get("secrets").is_none());

        let first = &response["workspaces"][5];
        assert_eq!(first["id"], json!("1"));
        assert_eq!(first["task_ids"], json!(["1", "2"]));

        let task = response["tasks"]
            .as_array()
            .unwrap()
            .iter()
            .find(|task| task["id"] == json!("3"))
            .unwrap();
        assert_eq!(task["workspace_id"], json!("2"));
        assert_eq!(task["done"], json!(false));
    }

    #[tokio::test]
    async fn test_empty_include_key_is_present() {
        let response = present(&collection(), "only=3&include=tasks").await;
        assert_eq!(response["tasks"], json!([]));
        assert_eq!(response["workspaces"][0]["task_ids"], json!([]));
    }

    #[tokio::test]
    async fn test_include_fields_reach_the_bucket() {
        let response = present(&collection(), "only=6&include=tasks:notes;owner").await;

        assert_eq!(response["tasks"][0]["notes"], json!("task 4"));
        assert_eq!(response["users"], json!([{"id": "2", "name": "grace"}]));
    }

    #[tokio::test]
    async fn test_association_lookup_runs_once_per_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let workspace = Presenter::inherits(&workspace_presenter(Arc::new(AtomicUsize::new(0))))
            .presents("Workspace")
            .associations(move |a| {
                a.association(
                    "steward",
                    "User",
                    AssociationOptions::new().lookup(move |models, _| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let users = Arc::new(ModelClass::new("User", "users"));
                        models
                            .iter()
                            .map(|model| {
                                let steward = Record::new(
                                    Arc::clone(&users),
                                    [
                                        ("id".to_string(), Value::Int(1)),
                                        ("name".to_string(), Value::from("ada")),
                                    ]
                                    .into_iter()
                                    .collect(),
                                );
                                (model.id(), Related::from(steward))
                            })
                            .collect()
                    }),
                );
            })
            .build()
            .unwrap();

        let response = present(&collection_with(workspace), "only=1,2&include=steward").await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ids(&response, "users"), vec!["1"]);
        assert_eq!(response["workspaces"][0]["steward_id"], json!("1"));
        assert_eq!(response["workspaces"][1]["steward_id"], json!("1"));
    }

    #[tokio::test]
    async fn test_shared_owner_is_deduplicated() {
        let response = present(&collection(), "owner_id=1&include=owner").await;
        assert_eq!(ids(&response, "users"), vec!["1"]);
    }
}

// ============================================================================
// Search
// ============================================================================

mod search {
    use super::*;
    use pretty_assertions::assert_eq;

    fn searching_collection(results: SearchResults) -> PresenterCollection {
        let workspace = Presenter::inherits(&workspace_presenter(Arc::new(AtomicUsize::new(0))))
            .presents("Workspace")
            .search(move |_query: &str, _options: &SearchOptions| -> anyhow::Result<SearchResults> {
                Ok(results.clone())
            })
            .build()
            .unwrap();
        collection_with(workspace)
    }

    #[tokio::test]
    async fn test_search_results_keep_rank() {
        let response = present(&searching_collection(SearchResults::found(vec![3, 1], 2)), "search=ws").await;
        assert_eq!(ids(&response, "workspaces"), vec!["3", "1"]);
        assert_eq!(response["count"], json!(2));
    }

    #[tokio::test]
    async fn test_unavailable_search_is_an_error() {
        let source = SqliteSource::new(pool().await);
        let result = searching_collection(SearchResults::unavailable())
            .presenting(
                "workspaces",
                PresentingOptions::new(RequestParams::from_query("search=ws")),
                &source,
            )
            .await;

        assert!(matches!(result, Err(Error::SearchUnavailable)));
    }
}

// ============================================================================
// Derived attributes
// ============================================================================

mod derived {
    use super::*;
    use pretty_assertions::assert_eq;
    use brainstem::PresentOptions;

    #[derive(Attributes)]
    struct Workspace {
        id: i64,
        title: String,
        #[attribute(rename = "created_on")]
        created: Option<String>,
        #[attribute(skip)]
        #[allow(dead_code)]
        cached_html: String,
    }

    #[test]
    fn test_derived_model_renders() {
        let class = Arc::new(ModelClass::new("Workspace", "workspaces"));
        let model = Workspace {
            id: 9,
            title: "derived".into(),
            created: None,
            cached_html: "<p>".into(),
        };

        let record = Record::from_model(&class, &model);
        assert_eq!(record.id(), 9);
        assert!(!record.has_attribute("cached_html"));

        let presenter = workspace_presenter(Arc::new(AtomicUsize::new(0)));
        let rendered = presenter
            .group_present(&[Arc::new(record)], &PresentOptions::default())
            .unwrap();

        assert_eq!(rendered[0]["id"], json!("9"));
        assert_eq!(rendered[0]["title"], json!("derived"));
        assert_eq!(rendered[0]["created_on"], JsonValue::Null);
        assert_eq!(rendered[0]["score"], json!(90));
    }
}
