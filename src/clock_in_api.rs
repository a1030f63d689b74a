use crate::api_model::ClockInCreate;
use crate::api_model::ClockInFilter;
use crate::api_model::ClockInResponse;
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

const NOT_FOUND: &str = "Record not found";

/// CRUD and filter operations over the attendance collection.
#[derive(Clone)]
pub struct ClockInApi {
    database: Database,
}

impl ClockInApi {
    pub fn new(database: Database) -> ClockInApi {
        ClockInApi { database }
    }

    pub fn create(&self, record: ClockInCreate) -> Result<ClockInResponse> {
        let insert_datetime = sql_converters::now();
        let mut fields = record_fields(&record);
        fields.push(("insert_datetime", datetime_to_sqlite(insert_datetime)));
        let id = self.database.insert(Collection::ClockInRecords, &fields)?;
        debug!("Created clock-in record {}", id);
        Ok(ClockInResponse {
            id: id.to_string(),
            record,
            insert_datetime,
        })
    }

    pub fn get(&self, id: &str) -> Result<ClockInResponse> {
        let id = parse_id(id)?;
        match self.database.find_one(Collection::ClockInRecords, &id)? {
            Some(document) => record_from_document(&document),
            None => Err(Error::not_found(NOT_FOUND)),
        }
    }

    pub fn filter(&self, filter: &ClockInFilter) -> Result<Vec<ClockInResponse>> {
        let query = Filter::new()
            .and_some("email", Comparison::Equals, filter.email.clone())
            .and_some("location", Comparison::Equals, filter.location.clone())
            .and_some(
                "insert_datetime",
                Comparison::GreaterThan,
                filter.insert_datetime.map(datetime_to_sqlite),
            );
        self.database
            .find(Collection::ClockInRecords, &query)?
            .iter()
            .map(record_from_document)
            .collect()
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let id = parse_id(id)?;
        if self.database.delete_one(Collection::ClockInRecords, &id)? == 0 {
            return Err(Error::not_found(NOT_FOUND));
        }
        debug!("Deleted clock-in record {}", id);
        Ok(())
    }

    pub fn update(&self, id: &str, record: ClockInCreate) -> Result<ClockInResponse> {
        let id = parse_id(id)?;
        let modified =
            self.database
                .update_one(Collection::ClockInRecords, &id, &record_fields(&record))?;
        let document = self
            .database
            .find_one(Collection::ClockInRecords, &id)?
            .ok_or_else(|| Error::not_found(NOT_FOUND))?;
        if modified == 0 {
            return Err(Error {
                code: StatusCode::CONFLICT,
                msg: "Record not modified, no changes made".to_string(),
            });
        }
        record_from_document(&document)
    }
}

fn parse_id(id: &str) -> Result<ObjectId> {
    ObjectId::parse(id).ok_or_else(|| Error::not_found(NOT_FOUND))
}

fn record_fields(record: &ClockInCreate) -> Vec<(&'static str, SqlValue)> {
    vec![
        ("email", SqlValue::Text(record.email.clone())),
        ("location", SqlValue::Text(record.location.clone())),
    ]
}

fn record_from_document(document: &Document) -> Result<ClockInResponse> {
    Ok(ClockInResponse {
        id: document.id.to_string(),
        record: ClockInCreate {
            email: sql_converters::document_text(document, "email")?,
            location: sql_converters::document_text(document, "location")?,
        },
        insert_datetime: sql_converters::document_datetime(document, "insert_datetime")?,
    })
}
