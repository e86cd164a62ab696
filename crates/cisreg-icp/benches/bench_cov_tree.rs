use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::DVec3;
use rand::{rngs::StdRng, Rng, SeedableRng};

use cisreg_3d::Mesh;
use cisreg_icp::{CovarianceTree, TreeConfig};

// wavy height field with 2 * n * n triangles
fn grid_mesh(n: usize) -> Mesh {
    let mut vertices = Vec::with_capacity((n + 1) * (n + 1));
    for i in 0..=n {
        for j in 0..=n {
            let (x, y) = (i as f64, j as f64);
            vertices.push(DVec3::new(x, y, (0.3 * x).sin() * (0.2 * y).cos()));
        }
    }
    let idx = |i: usize, j: usize| i * (n + 1) + j;
    let mut triangles = Vec::with_capacity(2 * n * n);
    for i in 0..n {
        for j in 0..n {
            triangles.push([idx(i, j), idx(i + 1, j), idx(i + 1, j + 1)]);
            triangles.push([idx(i, j), idx(i + 1, j + 1), idx(i, j + 1)]);
        }
    }
    Mesh::new(vertices, triangles).expect("valid grid mesh")
}

fn bench_find_closest(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_closest");
    let mut rng = StdRng::seed_from_u64(0);

    for n in [16, 32, 64].iter() {
        let mesh = grid_mesh(*n);
        let tree =
            CovarianceTree::from_mesh(&mesh, &TreeConfig::default()).expect("valid tree");
        let extent = *n as f64;
        let queries: Vec<DVec3> = (0..100)
            .map(|_| {
                DVec3::new(
                    rng.random_range(0.0..extent),
                    rng.random_range(0.0..extent),
                    rng.random_range(-2.0..2.0),
                )
            })
            .collect();

        group.throughput(criterion::Throughput::Elements(queries.len() as u64));
        let parameter_string = format!("{}", mesh.num_triangles());

        group.bench_with_input(
            BenchmarkId::new("tree", &parameter_string),
            &queries,
            |b, queries| {
                b.iter(|| {
                    for q in queries {
                        black_box(tree.find_closest(*q, f64::INFINITY).ok());
                    }
                })
            },
        );

        group.bench_with_input(
            BenchmarkId::new("brute_force", &parameter_string),
            &queries,
            |b, queries| {
                b.iter(|| {
                    for q in queries {
                        black_box(tree.find_closest_brute_force(*q, f64::INFINITY).ok());
                    }
                })
            },
        );
    }
    group.finish();
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    for n in [16, 64].iter() {
        let mesh = grid_mesh(*n);
        group.bench_with_input(
            BenchmarkId::new("from_mesh", mesh.num_triangles()),
            &mesh,
            |b, mesh| b.iter(|| black_box(CovarianceTree::from_mesh(mesh, &TreeConfig::default()))),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_find_closest, bench_build);
criterion_main!(benches);
