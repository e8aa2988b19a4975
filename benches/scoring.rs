//! Scoring and game benchmarks
//!
//! Usage:
//!   cargo bench                     # run all benchmarks
//!   cargo bench -- score            # scoring only
//!   cargo bench -- game             # full games only

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use code_duel::{score, Code, Game, Slot};
use rand::seq::SliceRandom;

fn random_codes(count: usize) -> Vec<Code> {
    let mut rng = rand::thread_rng();
    let mut digits: Vec<u8> = (0..10).collect();
    let mut codes = Vec::with_capacity(count);
    while codes.len() < count {
        digits.shuffle(&mut rng);
        let text: String = digits[..4].iter().map(|d| char::from(b'0' + d)).collect();
        if let Ok(code) = text.parse() {
            codes.push(code);
        }
    }
    codes
}

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse/valid", |b| {
        b.iter(|| black_box("9876").parse::<Code>())
    });
    c.bench_function("parse/repeated_digit", |b| {
        b.iter(|| black_box("9886").parse::<Code>())
    });
}

fn bench_score(c: &mut Criterion) {
    let mut group = c.benchmark_group("score");
    let codes = random_codes(1024);

    for &n in &[64usize, 1024] {
        group.bench_with_input(BenchmarkId::new("pairs", n), &codes[..n], |b, codes| {
            b.iter(|| {
                for pair in codes.windows(2) {
                    black_box(score(&pair[0], &pair[1]));
                }
            });
        });
    }

    group.finish();
}

fn bench_game(c: &mut Criterion) {
    let codes = random_codes(64);

    c.bench_function("game/ten_turns", |b| {
        b.iter(|| {
            let mut game = Game::new();
            game.set_secret(Slot::One, "1234").ok();
            game.set_secret(Slot::Two, "5678").ok();
            let mut turn = Slot::One;
            for code in codes.iter().take(10) {
                let guess = code.to_string();
                match game.submit_guess(turn, &guess) {
                    Ok(_) if game.phase().winner().is_some() => break,
                    Ok(_) => turn = turn.other(),
                    Err(_) => break,
                }
            }
            black_box(game)
        });
    });
}

criterion_group!(benches, bench_parse, bench_score, bench_game);
criterion_main!(benches);
