use std::collections::BTreeMap;

use blog_db::models::PostRow;

/// A record whose text fields are mirrored into a full-text index.
///
/// The index name and field list are fixed per type.
pub trait Searchable {
    const INDEX: &'static str;
    const FIELDS: &'static [&'static str];

    /// Primary key, used as the document id.
    fn search_id(&self) -> i64;

    fn field(&self, name: &str) -> Option<String>;

    /// Flat field -> value map of the declared fields.
    fn document(&self) -> BTreeMap<String, String> {
        Self::FIELDS
            .iter()
            .filter_map(|name| self.field(name).map(|value| (name.to_string(), value)))
            .collect()
    }
}

impl Searchable for PostRow {
    const INDEX: &'static str = "posts";
    const FIELDS: &'static [&'static str] = &["body"];

    fn search_id(&self) -> i64 {
        self.id
    }

    fn field(&self, name: &str) -> Option<String> {
        match name {
            "body" => Some(self.body.clone()),
            _ => None,
        }
    }
}
