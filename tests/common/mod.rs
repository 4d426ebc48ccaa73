#![allow(dead_code)]

use chrono::NaiveDateTime;
use serde_json::{Value as JsonValue, json};
use sqlite_tablespec::prelude::*;
use sqlite_tablespec::{SqlValue, utils};

/// Small record used by most ORM tests.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: i64,
    pub kind: String,
    pub payload: Vec<u8>,
}

impl Entry {
    pub fn new(id: i64, kind: &str, payload: &[u8]) -> Self {
        Self {
            id,
            kind: kind.to_owned(),
            payload: payload.to_vec(),
        }
    }
}

impl TableSpec for Entry {
    fn fields() -> Vec<FieldDecl> {
        let kind = FieldType::str_literal(&["A", "B"]);
        let check = utils::check_constraint_for("kind", &kind).unwrap_or_default();
        vec![
            FieldDecl::new("id", FieldType::Integer).constraint("PRIMARY KEY"),
            FieldDecl::new("kind", kind)
                .constraint("NOT NULL")
                .default("'A'")
                .constraint(check),
            FieldDecl::new("payload", FieldType::Blob).constraint("NOT NULL"),
        ]
    }

    fn to_fields(&self) -> RowMapping {
        RowMapping::new()
            .with("id", self.id)
            .with("kind", self.kind.as_str())
            .with("payload", self.payload.clone())
    }

    fn from_fields(mut row: RowMapping) -> Result<Self, OrmError> {
        Ok(Self {
            id: row.take("id")?,
            kind: row.take("kind")?,
            payload: row.take("payload")?,
        })
    }
}

pub fn entries(n: i64) -> Vec<Entry> {
    (1..=n)
        .map(|i| Entry::new(i, if i % 2 == 0 { "B" } else { "A" }, &[u8::try_from(i).unwrap_or(0)]))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low = 1,
    High = 2,
}

impl IntEnum for Level {
    fn variants() -> &'static [Self] {
        &[Level::Low, Level::High]
    }

    fn to_int(self) -> i64 {
        self as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Red,
    Green,
}

impl StrEnum for Color {
    fn variants() -> &'static [Self] {
        &[Color::Red, Color::Green]
    }

    fn as_str(self) -> &'static str {
        match self {
            Color::Red => "red",
            Color::Green => "green",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Stores a point as 16 little-endian bytes; in memory it is the JSON pair `[x, y]`.
#[derive(Debug)]
pub struct PointCodec;

impl ColumnCodec for PointCodec {
    fn validate(&self, raw: SqlValue) -> Result<FieldValue, String> {
        let SqlValue::Blob(bytes) = raw else {
            return Err("point must be stored as a blob".into());
        };
        let bytes: [u8; 16] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("point blob has {} bytes, expected 16", b.len()))?;
        let mut x = [0_u8; 8];
        let mut y = [0_u8; 8];
        x.copy_from_slice(&bytes[..8]);
        y.copy_from_slice(&bytes[8..]);
        Ok(FieldValue::Json(json!([f64::from_le_bytes(x), f64::from_le_bytes(y)])))
    }

    fn serialize(&self, value: &FieldValue) -> Result<SqlValue, String> {
        let FieldValue::Json(JsonValue::Array(pair)) = value else {
            return Err(format!("expected a point, got {}", value.kind()));
        };
        let coords: Vec<f64> = pair.iter().filter_map(JsonValue::as_f64).collect();
        let [x, y] = coords[..] else {
            return Err("a point has exactly two numeric coordinates".into());
        };
        let mut bytes = x.to_le_bytes().to_vec();
        bytes.extend_from_slice(&y.to_le_bytes());
        Ok(SqlValue::Blob(bytes))
    }
}

/// One column of every supported field type.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub id: i64,
    pub flag: bool,
    pub ratio: f64,
    pub name: String,
    pub data: Option<Vec<u8>>,
    pub level: Level,
    pub color: Color,
    pub size: i64,
    pub mode: String,
    pub created: NaiveDateTime,
    pub seen: Option<NaiveDateTime>,
    pub stamp: NaiveDateTime,
    pub meta: JsonValue,
    pub at: Point,
}

impl TableSpec for Sample {
    fn fields() -> Vec<FieldDecl> {
        vec![
            FieldDecl::new("id", FieldType::Integer).constraint("PRIMARY KEY"),
            FieldDecl::new("flag", FieldType::Bool),
            FieldDecl::new("ratio", FieldType::Real),
            FieldDecl::new("name", FieldType::Text).constraint("NOT NULL"),
            FieldDecl::new("data", FieldType::Blob).optional(),
            FieldDecl::new("level", FieldType::int_enum::<Level>()),
            FieldDecl::new("color", FieldType::str_enum::<Color>()),
            FieldDecl::new("size", FieldType::int_literal(&[1, 2, 3])),
            FieldDecl::new("mode", FieldType::str_literal(&["r", "w"])),
            FieldDecl::new("created", FieldType::Datetime(DatetimeRepr::Iso8601)),
            FieldDecl::new("seen", FieldType::Datetime(DatetimeRepr::UnixInt)).optional(),
            FieldDecl::new("stamp", FieldType::Datetime(DatetimeRepr::UnixReal)),
            FieldDecl::new("meta", FieldType::Json),
            FieldDecl::new("at", FieldType::custom(PointCodec)).affinity(Affinity::Blob),
        ]
    }

    fn to_fields(&self) -> RowMapping {
        RowMapping::new()
            .with("id", self.id)
            .with("flag", self.flag)
            .with("ratio", self.ratio)
            .with("name", self.name.as_str())
            .with("data", self.data.clone())
            .with("level", self.level.to_int())
            .with("color", self.color.as_str())
            .with("size", self.size)
            .with("mode", self.mode.as_str())
            .with("created", self.created)
            .with("seen", self.seen)
            .with("stamp", self.stamp)
            .with("meta", self.meta.clone())
            .with("at", json!([self.at.x, self.at.y]))
    }

    fn from_fields(mut row: RowMapping) -> Result<Self, OrmError> {
        let at: JsonValue = row.take("at")?;
        let at = Point {
            x: at[0].as_f64().unwrap_or_default(),
            y: at[1].as_f64().unwrap_or_default(),
        };
        Ok(Self {
            id: row.take("id")?,
            flag: row.take("flag")?,
            ratio: row.take("ratio")?,
            name: row.take("name")?,
            data: row.take("data")?,
            level: row.take_int_enum("level")?,
            color: row.take_str_enum("color")?,
            size: row.take("size")?,
            mode: row.take("mode")?,
            created: row.take("created")?,
            seen: row.take("seen")?,
            stamp: row.take("stamp")?,
            meta: row.take("meta")?,
            at,
        })
    }

    fn validate(&self) -> Result<(), OrmError> {
        if self.ratio.is_nan() {
            return Err(OrmError::ValidationError("ratio must be a number".into()));
        }
        Ok(())
    }
}

pub fn ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").unwrap()
}

pub fn sample(id: i64) -> Sample {
    Sample {
        id,
        flag: id % 2 == 0,
        ratio: 0.25 * id as f64,
        name: format!("sample-{id}"),
        data: (id % 3 != 0).then(|| vec![0xde, 0xad, u8::try_from(id).unwrap_or(0)]),
        level: if id % 2 == 0 { Level::High } else { Level::Low },
        color: Color::Green,
        size: 2,
        mode: "w".into(),
        created: ts("2024-03-01 12:34:56.789"),
        seen: (id % 2 == 1).then(|| ts("2024-03-02 00:00:10")),
        stamp: ts("2024-03-03 08:00:00.5"),
        meta: json!({"tags": ["x", "y"], "id": id}),
        at: Point { x: 1.5, y: -2.25 },
    }
}

pub fn memory_factory() -> ConnectionFactory {
    std::sync::Arc::new(|| {
        sqlite_tablespec::rusqlite::Connection::open_in_memory().map_err(OrmError::from)
    })
}
