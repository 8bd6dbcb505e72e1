use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use mellon::{
    ContextHierarchy, EntityDescription, FieldKind, MellonConfig, MellonResult, QueryOptions,
    ResultType, Schema, StoreMode,
};

fn make_hierarchy_with_data(rows: u32) -> ContextHierarchy {
    let schema = Schema::new().with_entity(
        EntityDescription::new("Fruit")
            .required("id", FieldKind::String)
            .optional("name", FieldKind::String)
            .optional("weight", FieldKind::Int),
    );
    let stores = ContextHierarchy::open(
        "bench",
        StoreMode::InMemory,
        MellonConfig::default(),
        schema,
    )
    .unwrap();

    stores
        .transaction(move |ctx| -> MellonResult<()> {
            for i in 0..rows {
                let fruit = ctx.insert("Fruit")?;
                fruit.set("id", format!("f{i}"))?;
                fruit.set("name", format!("Fruit {i}"))?;
                fruit.set("weight", i64::from(i % 97))?;
            }
            Ok(())
        })
        .unwrap()
        .unwrap();
    stores.drain().unwrap();
    stores
}

fn bench_compile(c: &mut Criterion) {
    let stores = make_hierarchy_with_data(0);
    let main = stores.main_context().unwrap();

    c.bench_function("query/compile", |b| {
        let query = main
            .query("Fruit")
            .greater_than("weight", 10)
            .like("name", "fruit*", QueryOptions::CASE_INSENSITIVE)
            .contained_in("id", vec!["f1", "f2", "f3"])
            .sort("weight DESC, name");
        b.iter(|| query.compile(ResultType::Objects).unwrap());
    });
}

fn bench_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_count");
    group.throughput(Throughput::Elements(1));

    group.bench_function("count_1k_rows", |b| {
        // Seeding is excluded from timing.
        b.iter_custom(|iters| {
            let stores = make_hierarchy_with_data(1_000);
            let main = stores.main_context().unwrap();
            let query = main.query("Fruit").greater_than_or_equal("weight", 50);

            let start = Instant::now();
            for _ in 0..iters {
                query.count().unwrap();
            }
            start.elapsed()
        });
    });
    group.finish();
}

fn bench_elastic_pages(c: &mut Criterion) {
    c.bench_function("query/elastic_load_all", |b| {
        b.iter_custom(|iters| {
            let stores = make_hierarchy_with_data(1_000);
            let main = stores.main_context().unwrap();
            let query = main.query("Fruit").sort("id");

            let start = Instant::now();
            for _ in 0..iters {
                let mut pager = query.elastic().with_page_size(100);
                pager.load_all().unwrap();
            }
            start.elapsed()
        });
    });
}

criterion_group!(query, bench_compile, bench_count, bench_elastic_pages);
criterion_main!(query);
