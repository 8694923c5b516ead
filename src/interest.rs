use crate::item::InterestRecord;
use serde::Serialize;
use std::collections::HashSet;

/// 장르가 비어 있는 요청을 집계할 때 사용하는 장르 이름
pub const UNKNOWN_GENRE: &str = "Sin género";

/// 도서 요청 통계
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InterestStats {
    pub total_count: usize,

    /// 학번, 이메일, 이름 순서로 구분한 요청자 수
    pub unique_requester_count: usize,

    /// 가장 많이 요청된 장르. 요청이 없다면 [`None`]
    pub top_genre: Option<String>,

    /// 장르별 요청 수. 요청 수 내림차순이며 같으면 먼저 나온 장르가 앞에 온다.
    pub genre_ranking: Vec<(String, usize)>,
}

/// 도서 요청 스냅샷을 집계한다.
///
/// # Example
/// ```
/// use book_swap_rust::interest::aggregate;
/// use book_swap_rust::item::InterestRecord;
///
/// let interests = ["Arte", "Arte", "Ciencias"].into_iter()
///     .map(|genre| InterestRecord::builder().genre(genre).build())
///     .collect::<Vec<_>>();
///
/// let stats = aggregate(&interests);
/// assert_eq!(stats.total_count, 3);
/// assert_eq!(stats.top_genre.as_deref(), Some("Arte"));
/// assert_eq!(stats.genre_ranking, vec![("Arte".to_owned(), 2), ("Ciencias".to_owned(), 1)]);
/// ```
pub fn aggregate(interests: &[InterestRecord]) -> InterestStats {
    let requesters = interests.iter()
        .map(|i| i.requester().identity())
        .collect::<HashSet<_>>();

    let mut ranking: Vec<(String, usize)> = Vec::new();
    for interest in interests {
        let genre = match interest.genre().trim() {
            "" => UNKNOWN_GENRE,
            genre => genre,
        };
        match ranking.iter_mut().find(|(g, _)| g == genre) {
            Some((_, count)) => *count += 1,
            None => ranking.push((genre.to_owned(), 1)),
        }
    }
    // sort_by는 안정 정렬이므로 동률은 처음 나온 순서를 유지한다.
    ranking.sort_by(|(_, a), (_, b)| b.cmp(a));

    InterestStats {
        total_count: interests.len(),
        unique_requester_count: requesters.len(),
        top_genre: ranking.first().map(|(genre, _)| genre.clone()),
        genre_ranking: ranking,
    }
}
