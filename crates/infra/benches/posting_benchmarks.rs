use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::NaiveDate;
use forgeledger_accounting::{AccountType, LineInput, NewAccount};
use forgeledger_core::{AccountId, Money, TenantId, UserId};
use forgeledger_infra::{InMemoryLedgerStore, Ledger, NewEntry, OperationContext, VoidInput};
use tokio::runtime::Runtime;

struct Fixture {
    ledger: Ledger<InMemoryLedgerStore>,
    tenant: TenantId,
    user: UserId,
    cash: AccountId,
    sales: AccountId,
}

fn runtime() -> Runtime {
    Runtime::new().expect("tokio runtime")
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).expect("valid date")
}

async fn setup() -> Fixture {
    let ledger = Ledger::in_memory();
    let tenant = TenantId::new();
    let ctx = OperationContext::background();
    let cash = ledger
        .chart
        .create_account(&ctx, tenant, NewAccount::new("1000", "Cash", AccountType::Asset))
        .await
        .expect("cash account");
    let sales = ledger
        .chart
        .create_account(&ctx, tenant, NewAccount::new("4000", "Sales", AccountType::Revenue))
        .await
        .expect("sales account");
    Fixture {
        ledger,
        tenant,
        user: UserId::new(),
        cash: cash.id,
        sales: sales.id,
    }
}

fn sale(f: &Fixture, cents: i64) -> NewEntry {
    let amount = Money::from_cents(cents);
    NewEntry::new(
        date(),
        "Cash sale",
        f.user,
        vec![
            LineInput::debit(f.cash, amount),
            LineInput::credit(f.sales, amount),
        ],
    )
}

async fn seed(f: &Fixture, entries: usize) {
    let ctx = OperationContext::background();
    for i in 0..entries {
        f.ledger
            .posting
            .create_and_post(&ctx, f.tenant, sale(f, 100 + i as i64))
            .await
            .expect("seed entry");
    }
}

fn bench_posting_latency(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("posting_latency");
    group.sample_size(500);

    group.bench_function("create_and_post", |b| {
        let f = rt.block_on(setup());
        let ctx = OperationContext::background();
        b.iter(|| {
            rt.block_on(f.ledger.posting.create_and_post(&ctx, f.tenant, sale(&f, 1999)))
                .expect("post")
        });
    });

    group.bench_function("draft_then_post", |b| {
        let f = rt.block_on(setup());
        let ctx = OperationContext::background();
        b.iter(|| {
            rt.block_on(async {
                let draft = f
                    .ledger
                    .posting
                    .create_draft(&ctx, f.tenant, sale(&f, 1999))
                    .await
                    .expect("draft");
                f.ledger.posting.post(&ctx, f.tenant, draft.id).await.expect("post")
            })
        });
    });

    group.bench_function("post_then_void", |b| {
        let f = rt.block_on(setup());
        let ctx = OperationContext::background();
        b.iter(|| {
            rt.block_on(async {
                let entry = f
                    .ledger
                    .posting
                    .create_and_post(&ctx, f.tenant, sale(&f, 1999))
                    .await
                    .expect("post");
                f.ledger
                    .posting
                    .void(&ctx, f.tenant, entry.id, VoidInput::new("bench", f.user))
                    .await
                    .expect("void")
            })
        });
    });

    group.finish();
}

fn bench_report_speed(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("report_speed");

    for entry_count in [10usize, 100, 1000].iter() {
        let f = rt.block_on(async {
            let f = setup().await;
            seed(&f, *entry_count).await;
            f
        });
        let ctx = OperationContext::background();
        group.throughput(Throughput::Elements(*entry_count as u64 * 2));

        group.bench_with_input(
            BenchmarkId::new("trial_balance", entry_count),
            entry_count,
            |b, _| {
                b.iter(|| {
                    rt.block_on(f.ledger.reports.trial_balance(&ctx, f.tenant, black_box(date())))
                        .expect("trial balance")
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("account_balance", entry_count),
            entry_count,
            |b, _| {
                b.iter(|| {
                    rt.block_on(f.ledger.reports.account_balance(
                        &ctx,
                        f.tenant,
                        black_box(f.cash),
                        date(),
                    ))
                    .expect("balance")
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_posting_latency, bench_report_speed);
criterion_main!(benches);
