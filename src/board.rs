use crate::clock::Clock;
use crate::demo;
use crate::item::{BookRecord, BookRepository, BookView, Feed, ItemError, StoreError, Subscription};
use crate::lifecycle::{self, Approval, LifecycleError, PartialSwap, Replacement, SearchFilter, SwapError, SweepReport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::fmt::{Display, Formatter};
use tracing::{debug, info, warn};

/// 담당자 화면 작업 에러
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    /// 진행 중인 교환이 없음
    NoDraft,

    /// 교환 가능한 재고가 아님
    NotInStock(String),

    /// 다시 시도할 부분 실패가 없음
    NothingToRetry,

    Lifecycle(LifecycleError),

    Swap(SwapError),

    Store(StoreError),

    Item(ItemError),
}

impl Display for BoardError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BoardError::NoDraft => write!(f, "No swap in progress"),
            BoardError::NotInStock(id) => write!(f, "Book is not in the swap stock: {}", id),
            BoardError::NothingToRetry => write!(f, "No partially failed swap to retry"),
            BoardError::Lifecycle(e) => write!(f, "{}", e),
            BoardError::Swap(e) => write!(f, "{}", e),
            BoardError::Store(e) => write!(f, "{}", e),
            BoardError::Item(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for BoardError {}

impl From<LifecycleError> for BoardError {
    fn from(value: LifecycleError) -> Self {
        BoardError::Lifecycle(value)
    }
}

impl From<SwapError> for BoardError {
    fn from(value: SwapError) -> Self {
        BoardError::Swap(value)
    }
}

impl From<StoreError> for BoardError {
    fn from(value: StoreError) -> Self {
        BoardError::Store(value)
    }
}

impl From<ItemError> for BoardError {
    fn from(value: ItemError) -> Self {
        BoardError::Item(value)
    }
}

/// 실시간 구독 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Liveness {
    /// 아직 첫 스냅샷을 받지 못함
    Connecting,

    Live,

    /// 구독이 끊어져 마지막으로 받은 스냅샷을 보여주는 중
    Stale(String),
}

/// 진행 중인 교환
///
/// 장르는 원본 도서의 값으로 미리 채워지고 제목은 비어 있는 상태로 시작한다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapDraft {
    source_id: String,
    genre: String,
    title: String,
    partial: Option<PartialSwap>,
}

impl SwapDraft {
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn genre(&self) -> &str {
        &self.genre
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// 원본 도서는 교환 처리 되었지만 교환 받은 도서 등록에 실패한 상태
    pub fn partial(&self) -> Option<&PartialSwap> {
        self.partial.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingView {
    pub book: BookView,

    /// 만료까지 남은 시간
    pub hours_left: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DraftView {
    pub source_id: String,
    pub genre: String,
    pub title: String,
    pub awaiting_retry: bool,
}

/// 화면에 그릴 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardView {
    pub liveness: Liveness,
    pub last_update: Option<DateTime<Utc>>,
    pub minutes_since_update: Option<i64>,
    pub pending: Vec<PendingView>,

    /// 검색 조건이 적용된 재고
    pub available: Vec<BookView>,
    pub swapped_history: Vec<BookView>,

    /// 재고에 있는 장르 목록
    pub facets: Vec<String>,
    pub search_text: String,
    pub genre: String,
    pub draft: Option<DraftView>,
}

/// 담당자 화면
///
/// 도서 구독으로 받은 스냅샷을 분류해 보여주고, 스냅샷을 받을 때마다 만료된 사전 등록 도서를 삭제한다.
/// 승인, 교환, 초기 재고 등록 같은 작업은 저장소에 쓰기만 하며 화면은 다음 스냅샷으로 갱신 된다.
pub struct Board<R, C> {
    store: R,
    clock: C,
    records: Vec<BookRecord>,
    liveness: Liveness,
    last_update: Option<DateTime<Utc>>,
    search: SearchFilter,
    draft: Option<SwapDraft>,
    approve_swapped_in: bool,
    sweep_on_snapshot: bool,

    /// 삭제를 요청한 만료 도서. 같은 도서를 두 번 삭제하지 않기 위해 사용한다.
    swept: HashSet<String>,
}

impl<R, C> Board<R, C>
where
    R: BookRepository,
    C: Clock
{
    pub fn new(store: R, clock: C) -> Self {
        Self {
            store,
            clock,
            records: Vec::new(),
            liveness: Liveness::Connecting,
            last_update: None,
            search: SearchFilter::default(),
            draft: None,
            approve_swapped_in: false,
            sweep_on_snapshot: true,
            swept: HashSet::new(),
        }
    }

    /// 교환 받은 도서를 바로 재고로 등록할지 여부
    pub fn approve_swapped_in(mut self, approve: bool) -> Self {
        self.approve_swapped_in = approve;
        self
    }

    /// 스냅샷을 받을 때마다 만료 도서를 삭제할지 여부. 기본값은 `true`
    ///
    /// 끄더라도 만료 도서는 화면에 나오지 않으며 [`Board::tick`]은 여전히 삭제한다.
    pub fn sweep_on_snapshot(mut self, enabled: bool) -> Self {
        self.sweep_on_snapshot = enabled;
        self
    }

    pub fn store(&self) -> &R {
        &self.store
    }

    pub fn subscribe(&self) -> Result<Subscription<BookRecord>, StoreError> {
        self.store.subscribe()
    }

    pub fn records(&self) -> &[BookRecord] {
        &self.records
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    pub fn draft(&self) -> Option<&SwapDraft> {
        self.draft.as_ref()
    }

    /// 구독 이벤트를 반영한다. 스냅샷이라면 만료 도서를 삭제하고 그 결과를 반환한다.
    pub fn on_feed(&mut self, feed: Feed<BookRecord>) -> Option<SweepReport> {
        match feed {
            Feed::Snapshot(records) => {
                debug!("도서 스냅샷을 받았습니다. ({}권)", records.len());
                self.records = records;
                self.liveness = Liveness::Live;
                self.last_update = Some(self.clock.now());
                if self.sweep_on_snapshot {
                    Some(self.sweep())
                } else {
                    Some(SweepReport::default())
                }
            }
            Feed::Interrupted(reason) => {
                warn!("도서 구독이 끊어졌습니다. 마지막 스냅샷을 유지 합니다. => {}", reason);
                self.liveness = Liveness::Stale(reason);
                None
            }
        }
    }

    /// 새 스냅샷 없이 현재 시각으로 다시 분류하고 만료 도서를 삭제한다.
    pub fn tick(&mut self) -> SweepReport {
        self.sweep()
    }

    fn sweep(&mut self) -> SweepReport {
        let now = self.clock.now();
        let classification = lifecycle::classify(&self.records, now);
        let targets = classification.expired.into_iter()
            .filter(|r| r.id().is_some_and(|id| !self.swept.contains(id)))
            .collect::<Vec<_>>();

        if targets.is_empty() {
            return SweepReport::default();
        }

        let report = lifecycle::sweep(&self.store, &targets);
        self.swept.extend(report.deleted.iter().cloned());
        self.swept.extend(report.missing.iter().cloned());

        let present = self.records.iter().filter_map(|r| r.id()).collect::<HashSet<_>>();
        self.swept.retain(|id| present.contains(id.as_str()));
        report
    }

    /// 마지막 갱신 시각만 현재로 바꾼다.
    pub fn refresh(&mut self) {
        self.last_update = Some(self.clock.now());
    }

    /// 마지막 갱신 이후 지난 분
    pub fn minutes_since_update(&self) -> Option<i64> {
        self.last_update.map(|at| (self.clock.now() - at).num_minutes().max(0))
    }

    pub fn set_search(&mut self, search_text: &str) {
        self.search.set_search_text(search_text);
    }

    pub fn set_genre(&mut self, genre: &str) {
        self.search.set_genre(genre);
    }

    pub fn approve(&self, id: &str) -> Result<Approval, BoardError> {
        Ok(lifecycle::approve(&self.store, id)?)
    }

    /// 초기 재고를 등록한다.
    pub fn seed_demo(&self) -> Result<Vec<String>, BoardError> {
        let catalog = demo::catalog()?;
        Ok(lifecycle::seed(&self.store, &catalog)?)
    }

    /// 재고에 있는 도서의 교환을 시작한다. 이미 진행 중인 교환은 버려진다.
    pub fn start_swap(&mut self, id: &str) -> Result<&SwapDraft, BoardError> {
        let book = self.records.iter()
            .find(|r| r.id() == Some(id) && r.is_approved() && r.is_available())
            .ok_or_else(|| BoardError::NotInStock(id.to_owned()))?;

        let draft = SwapDraft {
            source_id: id.to_owned(),
            genre: book.genre().to_owned(),
            title: String::new(),
            partial: None,
        };
        Ok(self.draft.insert(draft))
    }

    pub fn edit_swap(&mut self, genre: Option<&str>, title: Option<&str>) -> Result<(), BoardError> {
        let draft = self.draft.as_mut().ok_or(BoardError::NoDraft)?;
        if let Some(genre) = genre {
            draft.genre = genre.to_owned();
        }
        if let Some(title) = title {
            draft.title = title.to_owned();
        }
        Ok(())
    }

    pub fn cancel_swap(&mut self) -> Option<SwapDraft> {
        self.draft.take()
    }

    /// 진행 중인 교환을 실행하고 교환 받은 도서의 아이디를 반환한다.
    ///
    /// 부분 실패라면 교환은 남겨두며 [`Board::retry_swap`]으로 교환 받은 도서 등록만 다시 시도 할 수 있다.
    pub fn confirm_swap(&mut self) -> Result<String, BoardError> {
        if self.draft.as_ref().is_some_and(|d| d.partial.is_some()) {
            return self.retry_swap();
        }

        let draft = self.draft.as_mut().ok_or(BoardError::NoDraft)?;
        let replacement = Replacement::new(&draft.genre, &draft.title).approved(self.approve_swapped_in);
        match lifecycle::swap(&self.store, &draft.source_id, &replacement) {
            Ok(id) => {
                self.draft = None;
                Ok(id)
            }
            Err(SwapError::Partial(partial)) => {
                draft.partial = Some(partial.clone());
                Err(BoardError::Swap(SwapError::Partial(partial)))
            }
            Err(e) => Err(BoardError::Swap(e)),
        }
    }

    pub fn retry_swap(&mut self) -> Result<String, BoardError> {
        let draft = self.draft.as_mut().ok_or(BoardError::NoDraft)?;
        let partial = draft.partial.as_ref().ok_or(BoardError::NothingToRetry)?;

        match lifecycle::retry_replacement(&self.store, partial) {
            Ok(id) => {
                info!("교환을 마무리 했습니다. (ID: {})", id);
                self.draft = None;
                Ok(id)
            }
            Err(SwapError::Partial(partial)) => {
                draft.partial = Some(partial.clone());
                Err(BoardError::Swap(SwapError::Partial(partial)))
            }
            Err(e) => Err(BoardError::Swap(e)),
        }
    }

    pub fn view(&self) -> BoardView {
        let now = self.clock.now();
        let classification = lifecycle::classify(&self.records, now);

        BoardView {
            liveness: self.liveness.clone(),
            last_update: self.last_update,
            minutes_since_update: self.minutes_since_update(),
            pending: classification.pending.iter()
                .map(|r| PendingView { book: r.to_view(), hours_left: lifecycle::time_to_expiry(r, now) })
                .collect(),
            available: self.search.apply(classification.available.iter().copied())
                .into_iter()
                .map(|r| r.to_view())
                .collect(),
            swapped_history: classification.swapped_history.iter().map(|r| r.to_view()).collect(),
            facets: lifecycle::genre_facets(classification.available.iter().copied()),
            search_text: self.search.search_text().to_owned(),
            genre: self.search.genre().to_owned(),
            draft: self.draft.as_ref().map(|d| DraftView {
                source_id: d.source_id.clone(),
                genre: d.genre.clone(),
                title: d.title.clone(),
                awaiting_retry: d.partial.is_some(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::item::repo::MemoryBookStore;
    use crate::item::{BookPatch, Condition, Owner};
    use chrono::{Duration, TimeZone};
    use std::cell::Cell;
    use std::sync::Arc;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 28, 8, 0, 0).unwrap()
    }

    fn book(genre: &str, title: &str) -> BookRecord {
        BookRecord::builder()
            .genre(genre)
            .title(title)
            .condition(Condition::New)
            .owner(Owner::new("Ana", "ana@espol.edu.ec", "202011111"))
            .time_slot("10:00–10:20")
            .build()
            .unwrap()
    }

    fn board() -> (Board<MemoryBookStore, ManualClock>, ManualClock) {
        let clock = ManualClock::new(start());
        let store = MemoryBookStore::with_clock(Arc::new(clock.clone()));
        (Board::new(store, clock.clone()), clock)
    }

    fn pump<R: BookRepository, C: Clock>(board: &mut Board<R, C>, subscription: &Subscription<BookRecord>) -> Option<SweepReport> {
        subscription.latest().and_then(|feed| board.on_feed(feed))
    }

    struct FlakyStore {
        inner: MemoryBookStore,
        fail_create: Cell<bool>,
    }

    impl BookRepository for FlakyStore {
        fn create(&self, book: &BookRecord) -> Result<String, StoreError> {
            if self.fail_create.get() {
                return Err(StoreError::Write("create rejected".to_owned()));
            }
            self.inner.create(book)
        }

        fn find_by_id(&self, id: &str) -> Result<Option<BookRecord>, StoreError> {
            self.inner.find_by_id(id)
        }

        fn update_fields(&self, id: &str, patch: &BookPatch) -> Result<(), StoreError> {
            self.inner.update_fields(id, patch)
        }

        fn delete(&self, id: &str) -> Result<bool, StoreError> {
            self.inner.delete(id)
        }

        fn subscribe(&self) -> Result<Subscription<BookRecord>, StoreError> {
            self.inner.subscribe()
        }
    }

    #[test]
    fn empty_first_snapshot_makes_the_board_live() {
        let (mut board, _) = board();
        assert_eq!(board.liveness(), &Liveness::Connecting);

        let subscription = board.subscribe().unwrap();
        let report = pump(&mut board, &subscription).unwrap();

        assert_eq!(board.liveness(), &Liveness::Live);
        assert_eq!(report, SweepReport::default());
        assert!(board.view().pending.is_empty());
    }

    #[test]
    fn snapshot_sweeps_expired_books_once() {
        let (mut board, clock) = board();
        let old = board.store().create(&book("Arte", "Viejo")).unwrap();
        clock.advance(Duration::hours(49));
        let fresh = board.store().create(&book("Arte", "Nuevo")).unwrap();

        let subscription = board.subscribe().unwrap();
        let report = pump(&mut board, &subscription).unwrap();
        assert_eq!(report.deleted, vec![old.clone()]);

        let report = pump(&mut board, &subscription).unwrap();
        assert!(report.deleted.is_empty());

        let view = board.view();
        assert_eq!(view.pending.len(), 1);
        assert_eq!(view.pending[0].book.id.as_deref(), Some(fresh.as_str()));
        assert_eq!(view.pending[0].hours_left, Some(48));
    }

    #[test]
    fn read_only_board_leaves_expired_books_in_the_store() {
        let (board, clock) = board();
        let mut board = board.sweep_on_snapshot(false);
        let old = board.store().create(&book("Arte", "Viejo")).unwrap();
        clock.advance(Duration::hours(49));

        let subscription = board.subscribe().unwrap();
        let report = pump(&mut board, &subscription).unwrap();

        assert_eq!(report, SweepReport::default());
        assert!(board.view().pending.is_empty());
        assert!(board.store().find_by_id(&old).unwrap().is_some());
    }

    #[test]
    fn tick_expires_books_without_a_new_snapshot() {
        let (mut board, clock) = board();
        let id = board.store().create(&book("Arte", "Viejo")).unwrap();
        let subscription = board.subscribe().unwrap();
        pump(&mut board, &subscription);

        clock.advance(Duration::hours(48));
        let report = board.tick();

        assert_eq!(report.deleted, vec![id]);
        assert!(board.store().is_empty());
    }

    #[test]
    fn interruption_keeps_the_last_snapshot() {
        let (mut board, _) = board();
        board.store().create(&book("Arte", "Color")).unwrap();
        let subscription = board.subscribe().unwrap();
        pump(&mut board, &subscription);

        assert_eq!(board.on_feed(Feed::Interrupted("network".to_owned())), None);
        assert_eq!(board.liveness(), &Liveness::Stale("network".to_owned()));
        assert_eq!(board.records().len(), 1);
    }

    #[test]
    fn approved_book_moves_to_stock_on_next_snapshot() {
        let (mut board, _) = board();
        let id = board.store().create(&book("Arte", "Color")).unwrap();
        let subscription = board.subscribe().unwrap();
        pump(&mut board, &subscription);
        assert_eq!(board.view().pending.len(), 1);

        assert_eq!(board.approve(&id), Ok(Approval::Approved));
        pump(&mut board, &subscription);

        let view = board.view();
        assert!(view.pending.is_empty());
        assert_eq!(view.available.len(), 1);
        assert_eq!(view.facets, vec!["all", "Arte"]);
    }

    #[test]
    fn view_applies_search_only_to_stock() {
        let (mut board, _) = board();
        board.seed_demo().unwrap();
        board.store().create(&book("Matemáticas", "Álgebra lineal")).unwrap();
        let subscription = board.subscribe().unwrap();
        pump(&mut board, &subscription);

        board.set_genre("Literatura");
        board.set_search("SOLEDAD");
        let view = board.view();

        assert_eq!(view.available.len(), 1);
        assert_eq!(view.available[0].title, "Cien años de soledad");
        assert_eq!(view.pending.len(), 1);
        assert!(!view.facets.contains(&"Matemáticas".to_owned()));
        assert_eq!(view.facets[0], "all");
    }

    #[test]
    fn swap_draft_flow() {
        let (mut board, _) = board();
        let id = board.store().create(&book("Literatura", "Rayuela").to_builder().approved(true).build().unwrap()).unwrap();
        let subscription = board.subscribe().unwrap();
        pump(&mut board, &subscription);

        let draft = board.start_swap(&id).unwrap();
        assert_eq!(draft.genre(), "Literatura");
        assert_eq!(draft.title(), "");

        assert!(matches!(board.confirm_swap(), Err(BoardError::Swap(SwapError::Invalid(_)))));
        assert!(board.draft().is_some());

        board.edit_swap(Some("Arte"), Some("Color")).unwrap();
        let replacement = board.confirm_swap().unwrap();
        assert!(board.draft().is_none());

        pump(&mut board, &subscription);
        let view = board.view();
        assert_eq!(view.swapped_history.len(), 1);
        assert_eq!(view.pending[0].book.id.as_deref(), Some(replacement.as_str()));
    }

    #[test]
    fn only_stock_books_can_be_swapped() {
        let (mut board, _) = board();
        let id = board.store().create(&book("Arte", "Color")).unwrap();
        let subscription = board.subscribe().unwrap();
        pump(&mut board, &subscription);

        assert_eq!(board.start_swap(&id).err(), Some(BoardError::NotInStock(id)));
        assert_eq!(board.edit_swap(None, Some("x")), Err(BoardError::NoDraft));
        assert_eq!(board.cancel_swap(), None);
    }

    #[test]
    fn partial_swap_is_retried_from_the_draft() {
        let clock = ManualClock::new(start());
        let store = FlakyStore { inner: MemoryBookStore::with_clock(Arc::new(clock.clone())), fail_create: Cell::new(false) };
        let id = store.create(&book("Arte", "Color").to_builder().approved(true).build().unwrap()).unwrap();
        let mut board = Board::new(store, clock).approve_swapped_in(true);
        let subscription = board.subscribe().unwrap();
        pump(&mut board, &subscription);

        board.start_swap(&id).unwrap();
        board.edit_swap(None, Some("Forma")).unwrap();
        board.store().fail_create.set(true);

        assert!(matches!(board.confirm_swap(), Err(BoardError::Swap(SwapError::Partial(_)))));
        assert!(board.draft().and_then(|d| d.partial()).is_some());
        assert!(board.view().draft.unwrap().awaiting_retry);

        board.store().fail_create.set(false);
        let replacement = board.retry_swap().unwrap();
        assert!(board.draft().is_none());

        let stored = board.store().find_by_id(&replacement).unwrap().unwrap();
        assert!(stored.is_approved());
        assert_eq!(board.store().inner.len(), 2);
    }

    #[test]
    fn minutes_since_update_follows_refresh() {
        let (mut board, clock) = board();
        assert_eq!(board.minutes_since_update(), None);

        let subscription = board.subscribe().unwrap();
        pump(&mut board, &subscription);
        clock.advance(Duration::minutes(7));
        assert_eq!(board.minutes_since_update(), Some(7));

        board.refresh();
        assert_eq!(board.minutes_since_update(), Some(0));
    }
}
