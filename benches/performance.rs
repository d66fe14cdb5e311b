use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dive_agent_engine::compactor::estimate_tokens;
use dive_agent_engine::permission::PermissionEngine;
use dive_agent_engine::tools::ToolAnnotations;
use dive_agent_engine::{ContentBlock, Message, MessageRole, PermissionMode, PermissionRule, TextBlock};
use serde_json::json;

fn create_messages(count: usize, text_size: usize) -> Vec<Message> {
    let text = "a".repeat(text_size);
    (0..count)
        .map(|i| {
            if i == 0 {
                Message::system(&text)
            } else if i % 2 == 0 {
                Message::user(&text)
            } else {
                Message::assistant(vec![ContentBlock::Text(TextBlock { text: text.clone() })])
            }
        })
        .collect()
}

fn create_messages_with_tools(count: usize) -> Vec<Message> {
    use dive_agent_engine::{ToolResultBlock, ToolUseBlock};

    let mut messages = vec![Message::system("You are a helpful assistant")];
    for i in 0..count {
        if i % 3 == 0 {
            messages.push(Message::user("Calculate 2 + 2"));
        } else if i % 3 == 1 {
            let tool_use = ToolUseBlock::new(format!("tool_{i}"), "calculator", json!({"operation": "add", "a": 2, "b": 2}));
            messages.push(Message::new(MessageRole::Assistant, vec![ContentBlock::ToolUse(tool_use)]));
        } else {
            let tool_result = ToolResultBlock::ok(format!("tool_{}", i - 1), vec![ContentBlock::text("4")]);
            messages.push(Message::new(MessageRole::User, vec![ContentBlock::ToolResult(tool_result)]));
        }
    }
    messages
}

fn bench_estimate_tokens_by_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate_tokens_by_count");
    for count in [0, 1, 5, 10, 20, 50, 100].iter() {
        let messages = create_messages(*count, 100);
        group.bench_with_input(BenchmarkId::from_parameter(count), &messages, |b, msgs| {
            b.iter(|| estimate_tokens(black_box(msgs)));
        });
    }
    group.finish();
}

fn bench_estimate_tokens_by_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate_tokens_by_size");
    for size in [10, 100, 1000, 10000].iter() {
        let messages = create_messages(10, *size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &messages, |b, msgs| {
            b.iter(|| estimate_tokens(black_box(msgs)));
        });
    }
    group.finish();
}

fn bench_estimate_tokens_with_tools(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate_tokens_with_tools");
    for count in [3, 9, 30, 90].iter() {
        let messages = create_messages_with_tools(*count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &messages, |b, msgs| {
            b.iter(|| estimate_tokens(black_box(msgs)));
        });
    }
    group.finish();
}

// The permission engine's evaluate() is on the hot path of every tool_use
// triage (S3) — one call per tool per turn. Benchmark its linear rule scan
// as the rule list grows, and the mode short-circuits that skip it entirely.
fn bench_permission_evaluate_by_rule_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("permission_evaluate_by_rule_count");

    for rule_count in [0, 5, 20, 100].iter() {
        let mut engine = PermissionEngine::new(PermissionMode::Default);
        for i in 0..*rule_count {
            engine.add_default_rule(PermissionRule::allow(format!("tool_{i}")));
        }
        group.bench_with_input(BenchmarkId::from_parameter(rule_count), &engine, |b, engine| {
            b.iter(|| {
                engine.evaluate(
                    black_box("tool_not_in_list"),
                    black_box(&json!({"command": "git status"})),
                    black_box(ToolAnnotations::default()),
                )
            });
        });
    }

    group.finish();
}

fn bench_permission_evaluate_with_input_prefix_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("permission_evaluate_with_input_prefix_match");

    let mut engine = PermissionEngine::new(PermissionMode::Default);
    for prefix in ["ls ", "cat ", "git ", "npm "] {
        engine.add_default_rule(PermissionRule::allow("bash").with_input_prefix("command", prefix));
    }
    engine.add_default_rule(PermissionRule::deny("bash").with_input_prefix("command", "rm "));

    group.bench_function("matching_last_rule", |b| {
        b.iter(|| {
            engine.evaluate(
                black_box("bash"),
                black_box(&json!({"command": "rm -rf /tmp/scratch"})),
                black_box(ToolAnnotations::default()),
            )
        });
    });

    group.bench_function("bypass_mode_short_circuit", |b| {
        let bypass = PermissionEngine::new(PermissionMode::BypassPermissions);
        b.iter(|| {
            bypass.evaluate(
                black_box("bash"),
                black_box(&json!({"command": "rm -rf /tmp/scratch"})),
                black_box(ToolAnnotations::default()),
            )
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_estimate_tokens_by_count,
    bench_estimate_tokens_by_size,
    bench_estimate_tokens_with_tools,
    bench_permission_evaluate_by_rule_count,
    bench_permission_evaluate_with_input_prefix_match,
);
criterion_main!(benches);
