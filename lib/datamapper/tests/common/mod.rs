//! Shared domain types for integration tests.

#![allow(dead_code)]

use datamapper::{Association, MemoryAdapter, Query, Record, Repository, Storable, Value, record};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    #[serde(default, skip_serializing)]
    pub posts: Vec<Post>,
    #[serde(default, skip_serializing)]
    pub profile: Option<Profile>,
}

impl Storable for User {
    fn table_name() -> &'static str {
        "users"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub user_id: Option<i64>,
    pub title: String,
    #[serde(default, skip_serializing)]
    pub author: Option<User>,
    #[serde(default, skip_serializing)]
    pub comments: Vec<Comment>,
}

impl Storable for Post {
    fn table_name() -> &'static str {
        "posts"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub body: String,
}

impl Storable for Comment {
    fn table_name() -> &'static str {
        "comments"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: i64,
    pub user_id: i64,
    pub bio: String,
}

impl Storable for Profile {
    fn table_name() -> &'static str {
        "profiles"
    }
}

pub fn user_posts(posts: Query<Post>) -> Association<User, Post> {
    Association::many(
        "posts",
        "user_id",
        move || posts.clone(),
        |user: &User| Value::from(user.id),
        |post: &Post| Value::from(post.user_id),
        |mut user: User, posts| {
            user.posts = posts;
            user
        },
    )
}

pub fn user_profile() -> Association<User, Profile> {
    Association::one_owned(
        "profile",
        "user_id",
        Query::<Profile>::new,
        |user: &User| Value::from(user.id),
        |profile: &Profile| Value::from(profile.user_id),
        |mut user: User, profile| {
            user.profile = Some(profile);
            user
        },
    )
}

pub fn post_author() -> Association<Post, User> {
    Association::one_owning(
        "author",
        "user_id",
        Query::<User>::new,
        |post: &Post| Value::from(post.user_id),
        |user: &User| Value::from(user.id),
        |mut post: Post, user| {
            post.author = Some(user);
            post
        },
    )
    .with_foreign_key_field("user_id")
}

pub fn post_comments() -> Association<Post, Comment> {
    Association::many(
        "comments",
        "post_id",
        Query::<Comment>::new,
        |post: &Post| Value::from(post.id),
        |comment: &Comment| Value::from(comment.post_id),
        |mut post: Post, comments| {
            post.comments = comments;
            post
        },
    )
}

/// Two users, three posts (one orphaned), two comments, one profile.
pub fn seeded_repository() -> Repository<MemoryAdapter> {
    let adapter = MemoryAdapter::new();
    adapter.seed(
        "users",
        [
            record! { "name" => "ada", "email" => "ada@example.com" },
            record! { "name" => "grace", "email" => None::<String> },
        ],
    );
    adapter.seed(
        "posts",
        [
            record! { "user_id" => 1, "title" => "engines" },
            record! { "user_id" => 1, "title" => "notes" },
            record! { "user_id" => 99, "title" => "orphan" },
        ],
    );
    adapter.seed(
        "comments",
        [
            record! { "post_id" => 1, "body" => "first" },
            record! { "post_id" => 1, "body" => "second" },
        ],
    );
    adapter.seed("profiles", [record! { "user_id" => 2, "bio" => "compilers" }]);
    Repository::new(adapter)
}

pub fn user_input(name: &str, email: &str) -> Record {
    record! { "name" => name, "email" => email }
}
