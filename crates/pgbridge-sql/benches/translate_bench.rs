use criterion::{criterion_group, criterion_main, Criterion};
use pgbridge_core::{OidRegistry, SchemaMapping};
use pgbridge_sql::catalog::{
    CatalogContext, CatalogEmulator, CatalogSnapshot, ColumnInfo, TableInfo, TableKind,
};
use pgbridge_sql::{split_statements, Translator};
use std::sync::Arc;

fn translate_bench(c: &mut Criterion) {
    let translator = Translator::default();
    let mapping = SchemaMapping::default();
    c.bench_function("translate", |b| {
        b.iter(|| {
            let _ = translator.translate(
                "SELECT id, embedding <-> $2 FROM public.items WHERE owner = $1::int ORDER BY 2 LIMIT 10;",
                &mapping,
            );
        })
    });
}

fn split_bench(c: &mut Criterion) {
    c.bench_function("split_statements", |b| {
        b.iter(|| {
            let _ = split_statements("BEGIN; INSERT INTO t VALUES ('a;b'); -- c;\nCOMMIT;");
        })
    });
}

fn catalog_bench(c: &mut Criterion) {
    let mut snapshot = CatalogSnapshot::default();
    for n in 0..50 {
        let mut table = TableInfo::new("SQLUser", format!("Table{n}"), TableKind::Table);
        table.columns = (1..=8)
            .map(|i| ColumnInfo::new(format!("Col{i}"), i, "VARCHAR(50)"))
            .collect();
        snapshot.tables.push(table);
    }
    let mapping = SchemaMapping::default();
    let ctx = CatalogContext {
        snapshot: &snapshot,
        mapping: &mapping,
        user: "bench",
        database: "bench",
    };
    let emulator = CatalogEmulator::new(Arc::new(OidRegistry::new()), "16.0");
    c.bench_function("catalog_columns", |b| {
        b.iter(|| {
            let _ = emulator
                .execute(
                    "SELECT c.relname, a.attname FROM pg_class c \
                     JOIN pg_attribute a ON a.attrelid = c.oid WHERE c.relkind = 'r' \
                     ORDER BY c.relname, a.attnum",
                    &ctx,
                    &[],
                )
                .expect("catalog");
        })
    });
}

criterion_group!(sql_benches, translate_bench, split_bench, catalog_bench);
criterion_main!(sql_benches);
