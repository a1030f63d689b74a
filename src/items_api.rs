use crate::api_model::EmailCount;
use crate::api_model::ItemCreate;
use crate::api_model::ItemFilter;
use crate::api_model::ItemResponse;
use crate::database_api::Collection;
use crate::database_api::Comparison;
use crate::database_api::Database;
use crate::database_api::Document;
use crate::database_api::Filter;
use crate::database_api::ObjectId;
use crate::error::Error;
use crate::error::Result;
use crate::sql_converters;
use crate::sql_converters::datetime_to_sqlite;
use log::debug;
use rusqlite::types::Value as SqlValue;
use warp::http::StatusCode;

const NOT_FOUND: &str = "Item not found";

/// CRUD, filter and aggregate operations over the inventory collection.
#[derive(Clone)]
pub struct ItemsApi {
    database: Database,
}

impl ItemsApi {
    pub fn new(database: Database) -> ItemsApi {
        ItemsApi { database }
    }

    pub fn create(&self, item: ItemCreate) -> Result<ItemResponse> {
        let insert_date = sql_converters::now();
        let mut fields = item_fields(&item);
        fields.push(("insert_date", datetime_to_sqlite(insert_date)));
        let id = self.database.insert(Collection::Items, &fields)?;
        debug!("Created item {}", id);
        Ok(ItemResponse {
            id: id.to_string(),
            item,
            insert_date,
        })
    }

    pub fn get(&self, id: &str) -> Result<ItemResponse> {
        let id = parse_id(id)?;
        match self.database.find_one(Collection::Items, &id)? {
            Some(document) => item_from_document(&document),
            None => Err(Error::not_found(NOT_FOUND)),
        }
    }

    pub fn filter(&self, filter: &ItemFilter) -> Result<Vec<ItemResponse>> {
        let query = Filter::new()
            .and_some("email", Comparison::Equals, filter.email.clone())
            .and_some(
                "expiry_date",
                Comparison::GreaterThan,
                filter.expiry_date.map(datetime_to_sqlite),
            )
            .and_some(
                "insert_date",
                Comparison::GreaterThan,
                filter.insert_date.map(datetime_to_sqlite),
            )
            .and_some("quantity", Comparison::GreaterOrEquals, filter.quantity);
        self.database
            .find(Collection::Items, &query)?
            .iter()
            .map(item_from_document)
            .collect()
    }

    /// Number of items per distinct email.
    pub fn aggregate(&self) -> Result<Vec<EmailCount>> {
        self.database
            .aggregate_count_by(Collection::Items, "email")?
            .into_iter()
            .map(|(email, count)| match email {
                SqlValue::Text(email) => Ok(EmailCount { email, count }),
                other => Err(Error {
                    code: StatusCode::INTERNAL_SERVER_ERROR,
                    msg: format!("Item email should be text, found {:?}", other),
                }),
            })
            .collect()
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let id = parse_id(id)?;
        if self.database.delete_one(Collection::Items, &id)? == 0 {
            return Err(Error::not_found(NOT_FOUND));
        }
        debug!("Deleted item {}", id);
        Ok(())
    }

    /// Replace the user fields of an item. `insert_date` is left untouched.
    pub fn update(&self, id: &str, item: ItemCreate) -> Result<ItemResponse> {
        let id = parse_id(id)?;
        let modified = self
            .database
            .update_one(Collection::Items, &id, &item_fields(&item))?;
        let document = self
            .database
            .find_one(Collection::Items, &id)?
            .ok_or_else(|| Error::not_found(NOT_FOUND))?;
        if modified == 0 {
            return Err(Error {
                code: StatusCode::CONFLICT,
                msg: "Item not modified, no changes made".to_string(),
            });
        }
        item_from_document(&document)
    }
}

fn parse_id(id: &str) -> Result<ObjectId> {
    ObjectId::parse(id).ok_or_else(|| Error::not_found(NOT_FOUND))
}

fn item_fields(item: &ItemCreate) -> Vec<(&'static str, SqlValue)> {
    vec![
        ("email", SqlValue::Text(item.email.clone())),
        ("item_name", SqlValue::Text(item.item_name.clone())),
        ("quantity", SqlValue::Integer(item.quantity)),
        ("expiry_date", datetime_to_sqlite(item.expiry_date)),
    ]
}

fn item_from_document(document: &Document) -> Result<ItemResponse> {
    Ok(ItemResponse {
        id: document.id.to_string(),
        item: ItemCreate {
            email: sql_converters::document_text(document, "email")?,
            item_name: sql_converters::document_text(document, "item_name")?,
            quantity: sql_converters::document_integer(document, "quantity")?,
            expiry_date: sql_converters::document_datetime(document, "expiry_date")?,
        },
        insert_date: sql_converters::document_datetime(document, "insert_date")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use chrono::Duration;
    use chrono::TimeZone;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::collections::HashSet;

    fn new_api() -> ItemsApi {
        ItemsApi::new(Database::open_in_memory().expect("Failed to open in-memory database"))
    }

    fn date(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap()
    }

    fn item(email: &str, quantity: i64, expiry_date: DateTime<Utc>) -> ItemCreate {
        ItemCreate {
            email: email.to_string(),
            item_name: "bolt".to_string(),
            quantity,
            expiry_date,
        }
    }

    #[test]
    fn test_create_then_get() -> Result<()> {
        let api = new_api();
        let before = sql_converters::now();
        let created = api.create(item("x@y.com", 5, date(1)))?;
        assert_eq!(created.id.len(), 24);
        assert!(created.insert_date >= before);
        assert!(created.insert_date <= sql_converters::now());
        assert_eq!(api.get(&created.id)?, created);
        Ok(())
    }

    #[test]
    fn test_ids_are_unique() -> Result<()> {
        let api = new_api();
        let mut ids = HashSet::new();
        for i in 0..20 {
            ids.insert(api.create(item("x@y.com", i, date(1)))?.id);
        }
        assert_eq!(ids.len(), 20);
        Ok(())
    }

    #[test]
    fn test_get_missing_or_malformed_id() {
        let api = new_api();
        let missing = ObjectId::generate().to_string();
        assert_eq!(api.get(&missing).unwrap_err(), Error::not_found(NOT_FOUND));
        assert_eq!(api.get("42").unwrap_err(), Error::not_found(NOT_FOUND));
        assert_eq!(api.get("").unwrap_err().code, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_filter() -> Result<()> {
        let api = new_api();
        let all: Vec<ItemResponse> = vec![
            api.create(item("a", 1, date(1)))?,
            api.create(item("a", 5, date(2)))?,
            api.create(item("b", 10, date(3)))?,
        ];

        assert_eq!(api.filter(&ItemFilter::default())?.len(), 3);

        for q in &[0, 1, 2, 5, 10, 11] {
            let filter = ItemFilter {
                quantity: Some(*q),
                ..ItemFilter::default()
            };
            let found: HashSet<String> = api.filter(&filter)?.into_iter().map(|i| i.id).collect();
            let expected: HashSet<String> = all
                .iter()
                .filter(|i| i.item.quantity >= *q)
                .map(|i| i.id.clone())
                .collect();
            assert_eq!(found, expected, "quantity >= {}", q);
        }

        for day in 1..=3 {
            let filter = ItemFilter {
                expiry_date: Some(date(day)),
                ..ItemFilter::default()
            };
            let found: HashSet<String> = api.filter(&filter)?.into_iter().map(|i| i.id).collect();
            let expected: HashSet<String> = all
                .iter()
                .filter(|i| i.item.expiry_date > date(day))
                .map(|i| i.id.clone())
                .collect();
            assert_eq!(found, expected, "expiry_date > {}", date(day));
        }

        let by_email = ItemFilter {
            email: Some("a".to_string()),
            quantity: Some(2),
            ..ItemFilter::default()
        };
        let found = api.filter(&by_email)?;
        assert_eq!(found, vec![all[1].clone()]);

        let inserted_later = ItemFilter {
            insert_date: Some(all[2].insert_date),
            ..ItemFilter::default()
        };
        assert!(api.filter(&inserted_later)?.is_empty());
        let inserted_earlier = ItemFilter {
            insert_date: Some(all[0].insert_date - Duration::seconds(1)),
            ..ItemFilter::default()
        };
        assert_eq!(api.filter(&inserted_earlier)?.len(), 3);
        Ok(())
    }

    #[test]
    fn test_aggregate() -> Result<()> {
        let api = new_api();
        assert!(api.aggregate()?.is_empty());
        api.create(item("a", 1, date(1)))?;
        api.create(item("a", 2, date(1)))?;
        api.create(item("b", 3, date(1)))?;
        let counts: HashMap<String, i64> = api
            .aggregate()?
            .into_iter()
            .map(|c| (c.email, c.count))
            .collect();
        let mut expected = HashMap::new();
        expected.insert("a".to_string(), 2);
        expected.insert("b".to_string(), 1);
        assert_eq!(counts, expected);
        Ok(())
    }

    #[test]
    fn test_delete() -> Result<()> {
        let api = new_api();
        let created = api.create(item("a", 1, date(1)))?;
        api.delete(&created.id)?;
        assert_eq!(api.get(&created.id).unwrap_err().code, StatusCode::NOT_FOUND);
        assert_eq!(api.delete(&created.id).unwrap_err().code, StatusCode::NOT_FOUND);
        assert_eq!(api.delete("zz").unwrap_err().code, StatusCode::NOT_FOUND);
        Ok(())
    }

    #[test]
    fn test_update_preserves_insert_date() -> Result<()> {
        let api = new_api();
        let created = api.create(item("a", 1, date(1)))?;
        let replacement = ItemCreate {
            email: "b".to_string(),
            item_name: "nut".to_string(),
            quantity: 7,
            expiry_date: date(9),
        };
        let updated = api.update(&created.id, replacement.clone())?;
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.item, replacement);
        assert_eq!(updated.insert_date, created.insert_date);
        assert_eq!(api.get(&created.id)?, updated);
        Ok(())
    }

    #[test]
    fn test_update_without_changes_or_target() -> Result<()> {
        let api = new_api();
        let created = api.create(item("a", 1, date(1)))?;
        let err = api.update(&created.id, created.item.clone()).unwrap_err();
        assert_eq!(err.code, StatusCode::CONFLICT);

        let missing = ObjectId::generate().to_string();
        let err = api.update(&missing, created.item.clone()).unwrap_err();
        assert_eq!(err.code, StatusCode::NOT_FOUND);
        let err = api.update("not-an-id", created.item).unwrap_err();
        assert_eq!(err.code, StatusCode::NOT_FOUND);
        Ok(())
    }
}
