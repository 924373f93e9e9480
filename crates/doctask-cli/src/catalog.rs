//! The query tasks shipped with `doctask`.
//!
//! Every task takes a cloned [`Database`] handle and returns the value the
//! reporter prints. Only `articles-bulk-seed` is enabled by default; the
//! others are picked with `--task`, `--all` or the `tasks` setting.

use anyhow::Result;
use doctask_core::{Task, TaskRegistry};
use doctask_store::{Database, FindOptions, ReturnDocument, WriteModel};
use serde_json::{json, Value};

pub const USERS: &str = "users";
pub const STUDENTS: &str = "students";
pub const ARTICLES: &str = "articles";

/// Build the registry with every catalog task in its fixed order.
pub fn registry() -> doctask_core::Result<TaskRegistry<Database>> {
    let mut registry = TaskRegistry::new();

    registry.register_task(
        Task::new("users-overview", users_overview)
            .with_description("Fetch all users and the first user concurrently"),
    )?;
    registry.register_task(
        Task::new("users-youngest", users_youngest)
            .with_description("Five youngest users with first name, last name and age"),
    )?;
    registry.register_task(
        Task::new("users-grant-skills", users_grant_skills)
            .with_description("Add an empty skills list to users aged 25-29 or tagged Engineering"),
    )?;
    registry.register_task(
        Task::new("users-set-skills", users_set_skills)
            .with_description("Set skills to [js, git] on the first user that has skills"),
    )?;
    registry.register_task(
        Task::new("users-replace-john", users_replace_john)
            .with_description("Replace the first Californian user whose email starts with john"),
    )?;
    registry.register_task(
        Task::new("users-pull-tag", users_pull_tag)
            .with_description("Remove tag 'c' from Jason Wood"),
    )?;
    registry.register_task(
        Task::new("users-push-tag-once", users_push_tag_once)
            .with_description("Add tag 'b' to Jason Wood unless already present"),
    )?;
    registry.register_task(
        Task::new("users-delete-support", users_delete_support)
            .with_description("Delete every user in the Support department"),
    )?;
    registry.register_task(
        Task::new("articles-bulk-seed", articles_bulk_seed)
            .with_description("Create the articles collection and seed it with one bulk write")
            .with_enabled(true),
    )?;
    registry.register_task(
        Task::new("articles-by-tags", articles_by_tags)
            .with_description("Articles tagged 'super' or 'tag2-a'"),
    )?;
    registry.register_task(
        Task::new("students-worst-homework", students_worst_homework)
            .with_description("Student with the worst homework score"),
    )?;
    registry.register_task(
        Task::new("students-avg-homework", students_avg_homework)
            .with_description("Average homework score across all students"),
    )?;
    registry.register_task(
        Task::new("students-avg-by-student", students_avg_by_student)
            .with_description("Average score per student, best first"),
    )?;
    registry.register_task(
        Task::new("fixtures-clear", fixtures_clear)
            .with_description("Delete all users and students"),
    )?;

    Ok(registry)
}

// Users

pub async fn users_overview(db: Database) -> Result<Value> {
    let users = db.collection(USERS);
    let (all_users, first_user) = tokio::try_join!(
        users.find(json!({}), FindOptions::new()),
        users.find_one(json!({})),
    )?;

    Ok(json!({
        "all_users": all_users,
        "first_user": first_user,
    }))
}

pub async fn users_youngest(db: Database) -> Result<Value> {
    let options = FindOptions::new()
        .projection(json!({"firstName": 1, "lastName": 1, "age": 1}))
        .sort(json!({"age": 1}))
        .limit(5);

    let users = db.collection(USERS).find(json!({}), options).await?;
    Ok(Value::Array(users))
}

pub async fn users_grant_skills(db: Database) -> Result<Value> {
    let result = db
        .collection(USERS)
        .update_many(
            json!({
                "$or": [
                    {"age": {"$gte": 25, "$lt": 30}},
                    {"tags": {"$in": ["Engineering"]}}
                ]
            }),
            json!({"$set": {"skills": []}}),
        )
        .await?;

    Ok(json!({"modified_count": result.modified_count}))
}

pub async fn users_set_skills(db: Database) -> Result<Value> {
    let user = db
        .collection(USERS)
        .find_one_and_update(
            json!({"skills": {"$exists": true}}),
            json!({"$set": {"skills": ["js", "git"]}}),
            ReturnDocument::After,
        )
        .await?;

    Ok(user.unwrap_or(Value::Null))
}

pub async fn users_replace_john(db: Database) -> Result<Value> {
    let user = db
        .collection(USERS)
        .find_one_and_replace(
            json!({"email": {"$regex": "^john"}, "address.state": "CA"}),
            json!({
                "firstName": "Jason",
                "lastName": "Wood",
                "tags": ["a", "b", "c"],
                "department": "Support"
            }),
            ReturnDocument::After,
        )
        .await?;

    Ok(user.unwrap_or(Value::Null))
}

pub async fn users_pull_tag(db: Database) -> Result<Value> {
    let user = db
        .collection(USERS)
        .find_one_and_update(
            json!({"firstName": "Jason", "lastName": "Wood"}),
            json!({"$pull": {"tags": "c"}}),
            ReturnDocument::After,
        )
        .await?;

    Ok(user.unwrap_or(Value::Null))
}

pub async fn users_push_tag_once(db: Database) -> Result<Value> {
    let user = db
        .collection(USERS)
        .find_one_and_update(
            json!({"firstName": "Jason", "lastName": "Wood", "tags": {"$nin": ["b"]}}),
            json!({"$push": {"tags": "b"}}),
            ReturnDocument::After,
        )
        .await?;

    Ok(user.unwrap_or(Value::Null))
}

pub async fn users_delete_support(db: Database) -> Result<Value> {
    let result = db
        .collection(USERS)
        .delete_many(json!({"department": "Support"}))
        .await?;

    Ok(serde_json::to_value(result)?)
}

// Articles

fn article_seed() -> Vec<WriteModel> {
    vec![
        WriteModel::InsertOne {
            document: json!({
                "name": "Express - Introduction",
                "description": "An introduction to the Express framework",
                "type": "a",
                "tags": ["Node.js", "Web Development"]
            }),
        },
        WriteModel::InsertOne {
            document: json!({
                "name": "Machine Learning in Finance",
                "description": "Exploring the applications of machine learning in the finance industry",
                "type": "b",
                "tags": ["Machine Learning", "Finance"]
            }),
        },
        WriteModel::InsertOne {
            document: json!({
                "name": "Healthy Eating Habits",
                "description": "Tips for maintaining a healthy diet and lifestyle",
                "type": "c",
                "tags": ["Nutrition", "Wellness"]
            }),
        },
        WriteModel::UpdateMany {
            filter: json!({"type": "a"}),
            update: json!({"$set": {"tags": ["tag1-a", "tag2-a", "tag3"]}}),
        },
        WriteModel::UpdateMany {
            filter: json!({"type": {"$ne": "a"}}),
            update: json!({"$push": {"tags": {"$each": ["tag2", "tag3", "super"]}}}),
        },
        WriteModel::UpdateMany {
            filter: json!({}),
            update: json!({"$pull": {"tags": {"$in": ["tag2", "tag1-a"]}}}),
        },
    ]
}

pub async fn articles_bulk_seed(db: Database) -> Result<Value> {
    let articles = db.create_collection(ARTICLES).await?;
    let result = articles.bulk_write(article_seed()).await?;

    Ok(serde_json::to_value(result)?)
}

pub async fn articles_by_tags(db: Database) -> Result<Value> {
    let articles = db
        .collection(ARTICLES)
        .find(json!({"tags": {"$in": ["super", "tag2-a"]}}), FindOptions::new())
        .await?;

    Ok(Value::Array(articles))
}

// Students

pub async fn students_worst_homework(db: Database) -> Result<Value> {
    let result = db
        .collection(STUDENTS)
        .aggregate(vec![
            json!({"$unwind": "$scores"}),
            json!({"$match": {"scores.type": "homework"}}),
            json!({"$sort": {"scores.score": 1}}),
            json!({"$limit": 1}),
            json!({"$project": {"_id": 0, "name": 1, "worst_homework_score": "$scores.score"}}),
        ])
        .await?;

    Ok(Value::Array(result))
}

pub async fn students_avg_homework(db: Database) -> Result<Value> {
    let result = db
        .collection(STUDENTS)
        .aggregate(vec![
            json!({"$unwind": "$scores"}),
            json!({"$match": {"scores.type": "homework"}}),
            json!({"$group": {"_id": null, "avg_score": {"$avg": "$scores.score"}}}),
            json!({"$project": {"_id": 0}}),
        ])
        .await?;

    Ok(Value::Array(result))
}

pub async fn students_avg_by_student(db: Database) -> Result<Value> {
    let result = db
        .collection(STUDENTS)
        .aggregate(vec![
            json!({"$unwind": "$scores"}),
            json!({
                "$group": {
                    "_id": {"_id": "$_id", "name": "$name"},
                    "avg_score": {"$avg": "$scores.score"}
                }
            }),
            json!({"$sort": {"avg_score": -1}}),
            json!({"$project": {"_id": 0, "name": "$_id.name", "avg_score": 1}}),
        ])
        .await?;

    Ok(Value::Array(result))
}

pub async fn fixtures_clear(db: Database) -> Result<Value> {
    let users_coll = db.collection(USERS);
    let students_coll = db.collection(STUDENTS);
    let (users, students) = tokio::try_join!(
        users_coll.delete_many(json!({})),
        students_coll.delete_many(json!({})),
    )?;

    Ok(json!({
        "users_deleted": users.deleted_count,
        "students_deleted": students.deleted_count,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_order_and_defaults() {
        let registry = registry().unwrap();
        assert_eq!(registry.len(), 14);

        let selected = registry.selected();
        let names: Vec<&str> = selected.iter().map(|task| task.name.as_str()).collect();
        assert_eq!(names, vec!["articles-bulk-seed"]);
        assert!(registry.tasks().iter().all(|task| task.description.is_some()));
        assert_eq!(registry.tasks()[0].name, "users-overview");
    }
}
