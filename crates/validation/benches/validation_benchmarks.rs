use criterion::{Criterion, black_box, criterion_group, criterion_main};

use manifold_validation::{DocumentFormat, validate};

fn wide_yaml(entries: usize) -> String {
    let mut doc = String::from("items:\n");
    for i in 0..entries {
        doc.push_str(&format!(
            "  - name: item{i}\n    price: {i}\n    spec:\n      weight: {i}\n      color: red\n"
        ));
    }
    doc
}

fn bench_yaml_validation(c: &mut Criterion) {
    let schema = wide_yaml(1);
    let generated = wide_yaml(200);

    c.bench_function("validate_yaml_200_items", |b| {
        b.iter(|| {
            validate(
                black_box(&generated),
                black_box(&schema),
                DocumentFormat::Yaml,
            )
        })
    });
}

fn bench_xml_validation(c: &mut Criterion) {
    let schema = "<order><item><sku>a</sku><qty>1</qty></item></order>".to_string();
    let mut generated = String::from("<order>");
    for i in 0..200 {
        generated.push_str(&format!("<item><sku>s{i}</sku><qty>{i}</qty></item>"));
    }
    generated.push_str("</order>");

    c.bench_function("validate_xml_200_items", |b| {
        b.iter(|| {
            validate(
                black_box(&generated),
                black_box(&schema),
                DocumentFormat::Xml,
            )
        })
    });
}

criterion_group!(benches, bench_yaml_validation, bench_xml_validation);
criterion_main!(benches);
