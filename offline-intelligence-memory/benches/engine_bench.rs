// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use offline_intelligence_memory::{Budget, EngineConfig, MemoryEngine, Message};

const TOPICS: &[&str] = &[
    "ownership and borrowing in rust",
    "tuning the tokio runtime",
    "serializing structs with serde",
    "sourdough starter hydration",
    "planning a trip to lisbon",
    "indexing strategies for full text search",
];

fn history(len: usize) -> Vec<Message> {
    let mut messages = vec![Message::system("You are a helpful assistant")];
    for i in 0..len {
        let topic = TOPICS[i % TOPICS.len()];
        messages.push(if i % 2 == 0 {
            Message::user(format!("question {} about {}", i, topic))
        } else {
            Message::assistant(format!("answer {} covering {} in some detail", i, topic))
        });
    }
    messages
}

fn bench_optimize(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimize_context");

    for size in [100, 1000, 5000].iter() {
        let engine = MemoryEngine::new(EngineConfig::default()).unwrap();
        let messages = history(*size);
        engine.optimize_context("bench", &messages, None).unwrap();

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                engine
                    .optimize_context_with_budget(
                        "bench",
                        black_box(&messages),
                        Some("tokio runtime"),
                        Budget::messages(20).with_max_tokens(2_000),
                    )
                    .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");

    let engine = MemoryEngine::new(EngineConfig::default()).unwrap();
    for s in 0..20 {
        engine
            .append_messages(&format!("session-{}", s), &history(500))
            .unwrap();
    }

    group.bench_function("single_session", |b| {
        b.iter(|| engine.search(black_box("serde structs"), Some("session-3"), 10));
    });
    group.bench_function("cross_session", |b| {
        b.iter(|| engine.search(black_box("serde structs"), None, 10));
    });

    group.finish();
}

fn bench_title(c: &mut Criterion) {
    let engine = MemoryEngine::new(EngineConfig::default()).unwrap();
    let messages = history(50);

    c.bench_function("generate_title", |b| {
        b.iter(|| engine.generate_title(black_box(&messages)));
    });
}

criterion_group!(benches, bench_optimize, bench_search, bench_title);
criterion_main!(benches);
