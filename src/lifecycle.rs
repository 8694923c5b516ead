mod error;

pub use error::{LifecycleError, PartialSwap, SwapError};

use crate::item::{BookPatch, BookRecord, BookRepository, StoreError, ValidationError};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

/// 승인 되지 않은 사전 등록 도서가 만료 되기까지의 시간
pub const EXPIRY_HOURS: i64 = 48;

/// 모든 장르를 의미하는 필터 값
pub const ALL_GENRES: &str = "all";

/// 도서 스냅샷의 분류 결과
///
/// 네 구역은 서로 겹치지 않으며 각 구역 안에서는 입력 순서를 유지한다.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification<'a> {
    /// 승인 되지 않은 채 48시간이 지난 도서. 삭제 대상이다.
    pub expired: Vec<&'a BookRecord>,

    /// 승인 대기 중인 도서
    pub pending: Vec<&'a BookRecord>,

    /// 교환 가능한 재고
    pub available: Vec<&'a BookRecord>,

    /// 이미 교환된 도서
    pub swapped_history: Vec<&'a BookRecord>,
}

/// 도서 스냅샷을 만료, 승인 대기, 재고, 교환 이력으로 나눈다.
///
/// 교환이 끝난 도서(`available == false`)는 승인 여부나 경과 시간과 관계 없이 교환 이력으로 분류한다.
/// 생성 시각을 모르는 도서는 만료로 판단하지 않는다.
/// 이 함수는 아무것도 쓰지 않으며 만료된 도서의 삭제는 호출하는 쪽에서 [`sweep`]으로 처리 해야한다.
pub fn classify(records: &[BookRecord], now: DateTime<Utc>) -> Classification<'_> {
    let mut classification = Classification::default();

    for record in records {
        if !record.is_available() {
            classification.swapped_history.push(record);
        } else if record.is_approved() {
            classification.available.push(record);
        } else if is_expired(record, now) {
            classification.expired.push(record);
        } else {
            classification.pending.push(record);
        }
    }

    classification
}

/// 승인 되지 않았고 생성 후 48시간 이상 지났는지 여부. 정확히 48시간인 경우도 만료로 본다.
pub fn is_expired(record: &BookRecord, now: DateTime<Utc>) -> bool {
    if record.is_approved() {
        return false;
    }
    match record.created_at() {
        Some(created_at) => now - created_at >= Duration::hours(EXPIRY_HOURS),
        None => false,
    }
}

/// 만료까지 남은 시간(시간 단위, 올림). 생성 시각을 모르면 [`None`]
///
/// 화면 표시용으로 0보다 작거나 48보다 큰 값은 반환 하지 않는다.
///
/// # Example
/// ```
/// use book_swap_rust::item::{BookRecord, Condition, Owner};
/// use book_swap_rust::lifecycle::time_to_expiry;
/// use chrono::{Duration, TimeZone, Utc};
///
/// let created_at = Utc.with_ymd_and_hms(2025, 10, 27, 10, 0, 0).unwrap();
/// let book = BookRecord::builder()
///     .genre("Idiomas")
///     .title("English Grammar in Use")
///     .condition(Condition::Good)
///     .owner(Owner::new("Ana", "ana@espol.edu.ec", "202012345"))
///     .created_at(created_at)
///     .build()
///     .unwrap();
///
/// assert_eq!(time_to_expiry(&book, created_at), Some(48));
/// assert_eq!(time_to_expiry(&book, created_at + Duration::minutes(90)), Some(47));
/// assert_eq!(time_to_expiry(&book, created_at + Duration::hours(50)), Some(0));
/// ```
pub fn time_to_expiry(record: &BookRecord, now: DateTime<Utc>) -> Option<u32> {
    let created_at = record.created_at()?;
    let remaining = (created_at + Duration::hours(EXPIRY_HOURS) - now).num_milliseconds();
    if remaining <= 0 {
        return Some(0);
    }
    let hours = (remaining + 3_599_999) / 3_600_000;
    Some(hours.min(EXPIRY_HOURS) as u32)
}

/// 승인 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Approval {
    Approved,

    /// 이미 승인된 도서로 아무것도 저장하지 않았다.
    AlreadyApproved,
}

/// 도서를 승인한다. 이미 승인된 도서라면 아무것도 하지 않는다.
pub fn approve<R>(store: &R, id: &str) -> Result<Approval, LifecycleError>
where
    R: BookRepository + ?Sized
{
    let book = store.find_by_id(id)?
        .ok_or_else(|| LifecycleError::NotFound(id.to_owned()))?;

    if book.is_approved() {
        return Ok(Approval::AlreadyApproved);
    }

    store.update_fields(id, &BookPatch::approve())?;
    info!("도서를 승인 했습니다. (ID: {}, 제목: {})", id, book.title());
    Ok(Approval::Approved)
}

/// 교환으로 새로 받은 도서 정보
///
/// 장르와 제목만 새로 입력 받으며 소유자, 상태, 시간대는 교환된 원본 도서의 값을 그대로 이어 받는다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    genre: String,
    title: String,
    approved: bool,
}

impl Replacement {
    pub fn new(genre: &str, title: &str) -> Self {
        Self {
            genre: genre.to_owned(),
            title: title.to_owned(),
            approved: false,
        }
    }

    /// 교환 받은 도서를 바로 재고로 등록할지 여부. 기본값은 `false`(승인 대기)
    pub fn approved(mut self, approved: bool) -> Self {
        self.approved = approved;
        self
    }

    pub fn genre(&self) -> &str {
        &self.genre
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn is_approved(&self) -> bool {
        self.approved
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = ValidationError::new();
        if self.genre.trim().is_empty() {
            errors.add("genre", "Selecciona un género");
        }
        if self.title.trim().is_empty() {
            errors.add("title", "El título es obligatorio");
        }
        errors.into_result()
    }

    fn to_record(&self, source: &BookRecord) -> Result<BookRecord, SwapError> {
        BookRecord::builder()
            .genre(self.genre.trim())
            .title(self.title.trim())
            .condition(source.condition())
            .owner(source.owner().clone())
            .time_slot(source.time_slot())
            .approved(self.approved)
            .available(true)
            .build()
            .map_err(|e| {
                let mut errors = ValidationError::new();
                errors.add("replacement", &e.to_string());
                SwapError::Invalid(errors)
            })
    }
}

/// 도서를 교환한다.
///
/// 1. 원본 도서를 교환 완료(`available = false`)로 표시한다.
/// 2. 교환 받은 도서를 새로 등록하고 그 아이디를 반환한다.
///
/// 두 단계는 하나의 트랜잭션이 아니다. 1단계에서 실패하면 [`SwapError::Failed`]를,
/// 1단계 성공 후 2단계에서 실패하면 [`SwapError::Partial`]을 반환하며 1단계는 되돌리지 않는다.
pub fn swap<R>(store: &R, source_id: &str, replacement: &Replacement) -> Result<String, SwapError>
where
    R: BookRepository + ?Sized
{
    replacement.validate().map_err(SwapError::Invalid)?;

    let source = store.find_by_id(source_id)
        .map_err(SwapError::Failed)?
        .ok_or_else(|| SwapError::NotFound(source_id.to_owned()))?;

    if !source.is_available() {
        return Err(SwapError::AlreadySwapped(source_id.to_owned()));
    }

    let record = replacement.to_record(&source)?;

    store.update_fields(source_id, &BookPatch::mark_swapped())
        .map_err(|e| match e {
            StoreError::NotFound(id) => SwapError::NotFound(id),
            e => SwapError::Failed(e),
        })?;

    match store.create(&record) {
        Ok(id) => {
            info!("도서를 교환 했습니다. ({} => {}, 제목: {})", source_id, id, record.title());
            Ok(id)
        }
        Err(e) => {
            warn!("원본 도서는 교환 처리 되었지만 교환 받은 도서 등록에 실패 했습니다. (ID: {}) => {:?}", source_id, e);
            Err(SwapError::Partial(PartialSwap::new(source_id, record, e)))
        }
    }
}

/// 부분 실패한 교환의 2단계(교환 받은 도서 등록)만 다시 시도한다.
pub fn retry_replacement<R>(store: &R, partial: &PartialSwap) -> Result<String, SwapError>
where
    R: BookRepository + ?Sized
{
    match store.create(partial.replacement()) {
        Ok(id) => {
            info!("교환 받은 도서를 등록 했습니다. ({} => {})", partial.source_id(), id);
            Ok(id)
        }
        Err(e) => Err(SwapError::Partial(PartialSwap::new(partial.source_id(), partial.replacement().clone(), e))),
    }
}

/// 도서 목록을 순서대로 하나씩 등록한다.
///
/// 앞의 등록이 끝난 뒤에 다음 등록을 요청하므로 생성 시각의 상대 순서가 유지된다.
/// 등록에 실패하면 그 자리에서 멈춘다.
pub fn seed<R>(store: &R, catalog: &[BookRecord]) -> Result<Vec<String>, StoreError>
where
    R: BookRepository + ?Sized
{
    let mut ids = Vec::with_capacity(catalog.len());
    for book in catalog {
        match store.create(book) {
            Ok(id) => ids.push(id),
            Err(e) => {
                error!("초기 도서 등록 중 에러가 발생 하였습니다. ({}/{} 등록 완료) => {:?}", ids.len(), catalog.len(), e);
                return Err(e);
            }
        }
    }
    info!("초기 도서 {}권을 등록 했습니다.", ids.len());
    Ok(ids)
}

/// 만료 도서 삭제 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// 삭제한 도서
    pub deleted: Vec<String>,

    /// 이미 삭제 되어 있던 도서
    pub missing: Vec<String>,

    /// 삭제에 실패한 도서
    pub failed: Vec<(String, StoreError)>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// 만료된 도서를 하나씩 삭제한다.
///
/// 각 삭제는 서로 독립적이며 일부가 실패해도 나머지 삭제는 계속 진행한다.
/// 실패한 도서는 다음 분류에서 다시 만료로 판단 된다.
pub fn sweep<R>(store: &R, expired: &[&BookRecord]) -> SweepReport
where
    R: BookRepository + ?Sized
{
    let mut report = SweepReport::default();

    for book in expired {
        let Some(id) = book.id() else {
            continue;
        };
        match store.delete(id) {
            Ok(true) => {
                info!("만료된 사전 등록 도서를 삭제 했습니다. (ID: {}, 제목: {})", id, book.title());
                report.deleted.push(id.to_owned());
            }
            Ok(false) => report.missing.push(id.to_owned()),
            Err(e) => {
                error!("만료 도서 삭제 중 에러가 발생 하였습니다. (ID: {}) => {:?}", id, e);
                report.failed.push((id.to_owned(), e));
            }
        }
    }

    report
}

/// 장르 목록. [`ALL_GENRES`]가 항상 처음에 오며 나머지는 처음 나온 순서를 따른다.
///
/// # Example
/// ```
/// use book_swap_rust::item::{BookRecord, Condition, Owner};
/// use book_swap_rust::lifecycle::genre_facets;
///
/// let books = ["Arte", "Ciencias", "Arte"].into_iter()
///     .map(|genre| BookRecord::builder()
///         .genre(genre)
///         .title("t")
///         .condition(Condition::New)
///         .owner(Owner::default())
///         .build()
///         .unwrap())
///     .collect::<Vec<_>>();
///
/// assert_eq!(genre_facets(&books), vec!["all", "Arte", "Ciencias"]);
/// ```
pub fn genre_facets<'a, I>(records: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a BookRecord>
{
    let mut facets = vec![ALL_GENRES.to_owned()];
    for record in records {
        if !facets.iter().any(|g| g == record.genre()) {
            facets.push(record.genre().to_owned());
        }
    }
    facets
}

/// 제목 검색어와 장르로 도서를 거른다. 입력 순서는 유지 된다.
pub fn filter<'a, I>(records: I, search_text: &str, genre: &str) -> Vec<&'a BookRecord>
where
    I: IntoIterator<Item = &'a BookRecord>
{
    let needle = search_text.to_lowercase();
    records.into_iter()
        .filter(|r| matches(r, &needle, genre))
        .collect()
}

fn matches(record: &BookRecord, needle: &str, genre: &str) -> bool {
    let title_matches = needle.is_empty() || record.title().to_lowercase().contains(needle);
    let genre_matches = genre == ALL_GENRES || record.genre() == genre;
    title_matches && genre_matches
}

/// 화면에서 입력 받은 검색 조건
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilter {
    search_text: String,
    genre: String,
}

impl SearchFilter {
    pub fn new(search_text: &str, genre: &str) -> Self {
        Self {
            search_text: search_text.to_owned(),
            genre: genre.to_owned(),
        }
    }

    pub fn search_text(&self) -> &str {
        &self.search_text
    }

    pub fn genre(&self) -> &str {
        &self.genre
    }

    pub fn set_search_text(&mut self, search_text: &str) {
        self.search_text = search_text.to_owned();
    }

    pub fn set_genre(&mut self, genre: &str) {
        self.genre = genre.to_owned();
    }

    pub fn apply<'a, I>(&self, records: I) -> Vec<&'a BookRecord>
    where
        I: IntoIterator<Item = &'a BookRecord>
    {
        filter(records, &self.search_text, &self.genre)
    }
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self::new("", ALL_GENRES)
    }
}
