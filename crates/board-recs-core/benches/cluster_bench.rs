use board_recs_core::{
    BoardId, CardId, CardRecord, ListId, ListRecord, RecommendationConfig, RecommendationEngine,
    RelationClusterer, TermVector, DEFAULT_SIMILARITY_THRESHOLD,
};
use criterion::{criterion_group, criterion_main, Criterion};
use time::OffsetDateTime;

const TOPICS: [&str; 6] = [
    "fix urgent login bug",
    "deploy release pipeline",
    "quarterly planning meeting",
    "research vendor pricing",
    "code review checkout flow",
    "waiting on legal approval",
];

fn mk_cards(board_id: BoardId, list_id: ListId, count: usize) -> Vec<CardRecord> {
    (0..count)
        .map(|index| CardRecord {
            card_id: CardId::new(),
            board_id,
            list_id,
            title: format!("{} {index}", TOPICS[index % TOPICS.len()]),
            description: format!("ticket number {index} for sprint {}", index / 10),
            position: i64::try_from(index).unwrap_or(i64::MAX),
            created_at: OffsetDateTime::UNIX_EPOCH,
        })
        .collect()
}

fn bench_board(c: &mut Criterion) {
    let board_id = BoardId::new();
    let list = ListRecord {
        list_id: ListId::new(),
        board_id,
        title: "Review".to_string(),
        position: 1,
    };
    let cards = mk_cards(board_id, list.list_id, 200);
    let vectors = cards.iter().map(|card| TermVector::from_text(&card.text())).collect::<Vec<_>>();
    let clusterer = RelationClusterer::new(DEFAULT_SIMILARITY_THRESHOLD);

    c.bench_function("cluster_200_cards", |b| b.iter(|| clusterer.cluster(&vectors)));

    let engine = match RecommendationEngine::new(RecommendationConfig::default()) {
        Ok(engine) => engine,
        Err(err) => panic!("default config should be valid: {err}"),
    };
    let lists = vec![list];
    c.bench_function("recommend_200_cards", |b| {
        b.iter(|| engine.recommend(&cards, &lists, OffsetDateTime::UNIX_EPOCH));
    });
}

criterion_group!(benches, bench_board);
criterion_main!(benches);
