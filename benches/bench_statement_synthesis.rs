//! Statement synthesis cost with and without the cache, and the per-call overhead of a typed
//! single-row lookup compared with hand-written `rusqlite`.

use std::hint::black_box;
use std::sync::LazyLock;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use sqlite_tablespec::prelude::*;
use sqlite_tablespec::rusqlite::{Connection, params};
use sqlite_tablespec::statement::{self, Columns, Projection, SelectSpec};
use sqlite_tablespec::{StatementCache, StatementKey, TableName, schema_of};

#[derive(Debug, Clone)]
struct Row {
    id: i64,
    name: String,
    score: f64,
}

impl TableSpec for Row {
    fn fields() -> Vec<FieldDecl> {
        vec![
            FieldDecl::new("id", FieldType::Integer).constraint("PRIMARY KEY"),
            FieldDecl::new("name", FieldType::Text).constraint("NOT NULL"),
            FieldDecl::new("score", FieldType::Real),
        ]
    }

    fn to_fields(&self) -> RowMapping {
        RowMapping::new()
            .with("id", self.id)
            .with("name", self.name.as_str())
            .with("score", self.score)
    }

    fn from_fields(mut row: RowMapping) -> Result<Self, OrmError> {
        Ok(Self {
            id: row.take("id")?,
            name: row.take("name")?,
            score: row.take("score")?,
        })
    }
}

/// Shuffled lookup order, identical on every run.
static IDS: LazyLock<Vec<i64>> = LazyLock::new(|| {
    let mut ids: Vec<i64> = (1..=row_count()).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(1_234_567_890);
    ids.shuffle(&mut rng);
    ids
});

fn row_count() -> i64 {
    std::env::var("BENCH_ROWS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(1000)
}

fn seeded_orm() -> Orm<Row> {
    let orm = Orm::<Row>::new(Connection::open_in_memory().expect("open"), "scores").expect("orm");
    orm.create_table(&CreateTableOptions::default()).expect("create");
    let rows = (1..=row_count()).map(|id| Row {
        id,
        name: format!("name-{id}"),
        score: id as f64 / 10.0,
    });
    orm.insert_many(rows.collect::<Vec<_>>()).expect("seed");
    orm
}

fn bench_synthesis(c: &mut Criterion) {
    let schema = schema_of::<Row>().expect("schema");
    let table = TableName::parse("scores").expect("table");
    let spec = SelectSpec::new(
        Projection::Columns(Columns::All),
        Predicate::Columns(vec!["id".into(), "name".into()]),
    );

    let mut group = c.benchmark_group("statement_synthesis");
    group.bench_function("uncached", |b| {
        b.iter(|| statement::select(black_box(&schema), &table, black_box(&spec)).expect("select"));
    });
    let cache = StatementCache::new(schema.clone(), table.clone());
    group.bench_function("cached", |b| {
        b.iter(|| {
            cache
                .get(black_box(StatementKey::Select(spec.clone())))
                .expect("select")
        });
    });
    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let ids = &*IDS;
    let orm = seeded_orm();

    let mut group = c.benchmark_group("single_row_lookup");
    group.throughput(Throughput::Elements(ids.len() as u64));
    group.bench_with_input(BenchmarkId::new("rusqlite", ids.len()), ids, |b, ids| {
        b.iter(|| {
            let mut stmt = orm
                .connection()
                .prepare_cached("SELECT id, name, score FROM scores WHERE id = ?1")
                .expect("prepare");
            for id in ids {
                let row = stmt
                    .query_row(params![id], |r| {
                        Ok(Row {
                            id: r.get(0)?,
                            name: r.get(1)?,
                            score: r.get(2)?,
                        })
                    })
                    .expect("row");
                black_box(row);
            }
        });
    });
    group.bench_with_input(BenchmarkId::new("tablespec", ids.len()), ids, |b, ids| {
        b.iter(|| {
            for id in ids {
                let row = orm
                    .select_one(&Filter::eq("id", *id), &SelectOptions::new())
                    .expect("row");
                black_box(row);
            }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_synthesis, bench_lookup);
criterion_main!(benches);
