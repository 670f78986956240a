use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use pano_image::Image;
use pano_imgproc::pyramid::{build_laplacian_pyramid, collapse_laplacian_pyramid, pyrdown, pyrup};

fn bench_pyramid(c: &mut Criterion) {
    let mut group = c.benchmark_group("Pyramid Operations");

    for (width, height) in [(256, 224), (512, 448), (1024, 896)].iter() {
        group.throughput(criterion::Throughput::Elements((*width * *height) as u64));

        let parameter_string = format!("{}x{}", width, height);

        let image_size = [*width, *height].into();
        let small_image_size = [*width / 2, *height / 2].into();

        let image_data = (0..(*width * *height * 3)).map(|x| (x % 255) as f32).collect();
        let image = Image::<f32, 3>::new(image_size, image_data).unwrap();
        let small_image = Image::<f32, 3>::from_size_val(small_image_size, 1.0).unwrap();

        group.bench_with_input(
            BenchmarkId::new("pyrdown_3c", &parameter_string),
            &(&image, &small_image),
            |b, i| {
                let (src, mut dst) = (i.0, i.1.clone());
                b.iter(|| {
                    black_box(pyrdown(src, &mut dst)).unwrap();
                })
            },
        );

        group.bench_with_input(
            BenchmarkId::new("pyrup_3c", &parameter_string),
            &(&small_image, &image),
            |b, i| {
                let (src, mut dst) = (i.0, i.1.clone());
                b.iter(|| {
                    black_box(pyrup(src, &mut dst)).unwrap();
                })
            },
        );

        group.bench_with_input(
            BenchmarkId::new("laplacian_5_bands", &parameter_string),
            &image,
            |b, src| {
                b.iter(|| {
                    let pyramid = build_laplacian_pyramid(src, 5).unwrap();
                    black_box(collapse_laplacian_pyramid(&pyramid)).unwrap();
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_pyramid);
criterion_main!(benches);
