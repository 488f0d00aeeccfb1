use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{seq::SliceRandom, thread_rng, Rng};
use std::sync::Arc;
use travel_storefront::{
    AccommodationItem, CartStore, EventItem, ItemKind, LineItem, MemoryStorage, Money, Price,
};

fn accommodation(id: i64) -> LineItem {
    LineItem::new(
        ItemKind::Accommodation(AccommodationItem {
            id,
            name: format!("Cabin {}", id),
            price_per_night: Money::from_major(50 + (id as u32 % 200)),
            city: "Kiruna".to_string(),
            location: "Lakeside".to_string(),
            beds: 2,
            images: vec![format!("https://img.example.com/cabin{}.jpg", id)],
        }),
        "Sweden",
    )
}

fn event(id: i64) -> LineItem {
    let price = if id % 4 == 0 {
        Price::Free
    } else {
        Price::Amount(Money::from_major(10 + (id as u32 % 90)))
    };
    LineItem::new(
        ItemKind::Event(EventItem {
            id,
            title: format!("Festival {}", id),
            price,
            city: "Bergen".to_string(),
            location: "Harbour".to_string(),
            category: "Music".to_string(),
            date: Some("2025-06-21".to_string()),
            images: vec![],
        }),
        "Norway",
    )
}

// Mixed cart mutations; every mutation rewrites the persisted mirror
pub fn cart_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("cart_store_mutations");

    for catalog_size in [10, 50, 200].iter() {
        let catalog: Vec<LineItem> = (0..*catalog_size as i64)
            .map(|i| if i % 2 == 0 { accommodation(i) } else { event(i) })
            .collect();

        group.bench_with_input(
            BenchmarkId::from_parameter(catalog_size),
            &catalog,
            |b, catalog| {
                b.iter(|| {
                    let mut cart = CartStore::load(Arc::new(MemoryStorage::new()));
                    let mut rng = thread_rng();

                    for _ in 0..200 {
                        let item = catalog.choose(&mut rng).unwrap();
                        let roll: f64 = rng.gen();
                        if roll < 0.6 {
                            let _ = cart.add_to_cart(item.clone());
                        } else if roll < 0.9 {
                            let _ = cart.update_item_quantity(item.id(), rng.gen_range(1..10));
                        } else {
                            cart.remove_from_cart(item.id());
                        }
                    }

                    black_box(cart.total())
                });
            },
        );
    }

    group.finish();
}

// Reloading a full cart from its mirror
pub fn reload_benchmark(c: &mut Criterion) {
    let storage = Arc::new(MemoryStorage::new());
    {
        let mut cart = CartStore::load(Arc::clone(&storage));
        for i in 0..200 {
            cart.add_to_cart(if i % 2 == 0 { accommodation(i) } else { event(i) })
                .unwrap();
        }
    }

    c.bench_function("cart_store_reload_200", |b| {
        b.iter(|| black_box(CartStore::load(Arc::clone(&storage)).len()))
    });
}

criterion_group!(benches, cart_benchmark, reload_benchmark);
criterion_main!(benches);
