#![allow(dead_code)]

use bson::oid::ObjectId;
use nexusodm::{Database, DocumentSchema, FieldDef, MemoryClient, Model, OdmConfig, QuerySet};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub content: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlogPost {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub title: Option<String>,
    pub author: Option<Author>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    pub year: Option<i32>,
    pub rating: i32,
}

pub static AUTHOR: LazyLock<Arc<DocumentSchema>> = LazyLock::new(|| {
    DocumentSchema::embedded("Author").field(FieldDef::new("name").db_field("n")).scalar("email").build()
});

pub static COMMENT: LazyLock<Arc<DocumentSchema>> = LazyLock::new(|| {
    DocumentSchema::embedded("Comment").field(FieldDef::new("content").db_field("c")).scalar("name").build()
});

pub static BLOG_POST: LazyLock<Arc<DocumentSchema>> = LazyLock::new(|| {
    DocumentSchema::builder("BlogPost")
        .field(FieldDef::new("title").db_field("t"))
        .field(FieldDef::embedded("author", Arc::clone(&AUTHOR)).db_field("a"))
        .field(FieldDef::list("tags"))
        .field(FieldDef::embedded_list("comments", Arc::clone(&COMMENT)).db_field("cs"))
        .scalar("year")
        .field(FieldDef::new("rating").default(3))
        .build()
});

impl Model for BlogPost {
    fn schema() -> Arc<DocumentSchema> {
        Arc::clone(&BLOG_POST)
    }
}

/// Same collection as [`BlogPost`], default accessor restricted to rated posts, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatedPost {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub title: Option<String>,
    pub rating: i32,
}

impl Model for RatedPost {
    fn schema() -> Arc<DocumentSchema> {
        Arc::clone(&BLOG_POST)
    }

    fn customize_objects(base: QuerySet<Self>) -> QuerySet<Self> {
        base.filter(bson::doc! {"rating__gte": 4})
            .and_then(|qs| qs.order_by(&["-rating"]))
            .unwrap_or(base)
    }
}

pub fn post(title: &str, tags: &[&str], year: Option<i32>, rating: i32) -> BlogPost {
    BlogPost {
        id: None,
        title: Some(title.to_owned()),
        author: None,
        tags: tags.iter().map(|t| (*t).to_owned()).collect(),
        comments: Vec::new(),
        year,
        rating,
    }
}

pub fn database() -> (Database, Arc<MemoryClient>) {
    database_with(OdmConfig::default())
}

pub fn database_with(config: OdmConfig) -> (Database, Arc<MemoryClient>) {
    Database::in_memory(config)
}

pub fn small_batches(batch_size: usize) -> (Database, Arc<MemoryClient>) {
    database_with(OdmConfig { batch_size, ..OdmConfig::default() })
}

/// Three posts: "Rust tips" (coding, rust; 2019; 5), "Python notes" (coding, python; 2015; 4),
/// "Travel log" (travel; no year; 2) with one author and a comment.
pub fn seeded() -> (Database, Arc<MemoryClient>) {
    let (db, client) = database();
    let mut travel = post("Travel log", &["travel"], None, 2);
    travel.author = Some(Author { name: "Ann".into(), email: None });
    travel.comments =
        vec![Comment { content: "great trip".into(), name: Some("Bo".into()) }];
    for p in [
        post("Rust tips", &["coding", "rust"], Some(2019), 5),
        post("Python notes", &["coding", "python"], Some(2015), 4),
        travel,
    ] {
        db.save(&p).unwrap();
    }
    client.reset_stats();
    (db, client)
}

pub fn titles(qs: &QuerySet<BlogPost>) -> Vec<String> {
    qs.to_vec().unwrap().into_iter().filter_map(|p| p.title).collect()
}
