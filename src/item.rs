pub mod repo;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::mpsc;
use std::time::Duration;

/// Item 모듈에서 사용할 에러 열거
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemError {
    /// 필수 데이터가 입력 되지 않음
    RequireArgumentMissing(String),

    /// 알 수 없는 열거형 코드
    UnknownCode(String)
}

impl Display for ItemError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ItemError::RequireArgumentMissing(field) => write!(f, "Require argument missing: {}", field),
            ItemError::UnknownCode(code) => write!(f, "Unknown code: {}", code),
        }
    }
}

impl std::error::Error for ItemError {}

/// 입력 데이터 검증 실패
///
/// 필드 경로(`name`, `books[0].title` 등)를 키로 필드별 메시지를 가진다.
/// 검증에 실패한 입력은 저장소까지 전달 되지 않는다.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    fields: BTreeMap<String, String>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self { fields: BTreeMap::new() }
    }

    pub fn add(&mut self, field: &str, message: &str) {
        self.fields.entry(field.to_owned()).or_insert_with(|| message.to_owned());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(|m| m.as_str())
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// 에러가 하나도 없다면 `Ok`를, 하나라도 있다면 자신을 `Err`로 반환한다.
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let messages = self.fields.iter()
            .map(|(field, message)| format!("{}: {}", field, message))
            .collect::<Vec<_>>();
        write!(f, "{}", messages.join(", "))
    }
}

impl std::error::Error for ValidationError {}

/// 저장소 연동 중 발생한 에러 열거
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// 저장소 연결 실패
    Connect(String),

    /// 조회 실패
    Query(String),

    /// 생성/수정/삭제 요청이 거부됨
    Write(String),

    /// 저장된 문서를 도메인으로 변환하지 못함
    Convert(String),

    /// 대상 문서가 없음
    NotFound(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Connect(msg) => write!(f, "Failed to connect store: {}", msg),
            StoreError::Query(msg) => write!(f, "Failed to query store: {}", msg),
            StoreError::Write(msg) => write!(f, "Store rejected write: {}", msg),
            StoreError::Convert(msg) => write!(f, "Failed to convert document: {}", msg),
            StoreError::NotFound(id) => write!(f, "Document not found: {}", id),
        }
    }
}

impl std::error::Error for StoreError {}

/// 도서 상태
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Condition {
    New,
    Good,
    Acceptable,
}

impl Condition {
    pub const ALL: [Condition; 3] = [Condition::New, Condition::Good, Condition::Acceptable];

    /// 저장소에 기록되는 코드 값
    pub fn to_code_str(&self) -> &'static str {
        match self {
            Condition::New => "Nuevo",
            Condition::Good => "Bueno",
            Condition::Acceptable => "Aceptable",
        }
    }

    /// 저장 코드(`Nuevo`, `Bueno`, `Aceptable`) 혹은 영문 이름으로 상태를 찾는다. 대소문자는 구분하지 않는다.
    pub fn from_str(s: &str) -> Result<Self, ItemError> {
        match s.trim().to_lowercase().as_str() {
            "nuevo" | "new" => Ok(Condition::New),
            "bueno" | "good" => Ok(Condition::Good),
            "aceptable" | "acceptable" => Ok(Condition::Acceptable),
            _ => Err(ItemError::UnknownCode(s.to_owned())),
        }
    }
}

impl TryFrom<&str> for Condition {
    type Error = ItemError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Condition::from_str(value)
    }
}

impl Display for Condition {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_code_str())
    }
}

impl Serialize for Condition {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer
    {
        serializer.serialize_str(self.to_code_str())
    }
}

/// 도서를 가져온 사람 혹은 도서를 요청한 사람
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Owner {
    name: String,
    email: String,
    code: String,
}

impl Owner {
    pub fn new(name: &str, email: &str, code: &str) -> Self {
        Self {
            name: name.to_owned(),
            email: email.to_owned(),
            code: code.to_owned(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// 학번. 담당자만 확인하며 조회용 뷰에는 절대 노출 하지 않는다.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// 사람을 구분하는 값으로 학번, 이메일, 이름 순서로 비어있지 않은 첫번째 값을 사용한다.
    ///
    /// # Example
    /// ```
    /// use book_swap_rust::item::Owner;
    ///
    /// assert_eq!(Owner::new("Ana", "ana@espol.edu.ec", "202012345").identity(), "202012345");
    /// assert_eq!(Owner::new("Ana", "ana@espol.edu.ec", "").identity(), "ana@espol.edu.ec");
    /// assert_eq!(Owner::new("Ana", "", "").identity(), "Ana");
    /// ```
    pub fn identity(&self) -> &str {
        [&self.code, &self.email, &self.name].into_iter()
            .find(|v| !v.is_empty())
            .map(|v| v.as_str())
            .unwrap_or("")
    }
}

/// 교환 도서
///
/// 사전 등록으로 만들어진 도서는 승인 되지 않은 상태(`approved == false`)로 시작하며,
/// 담당자가 승인하면 교환 가능한 재고가 된다. 교환이 끝난 도서는 `available == false`로 이력에만 남는다.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BookRecord {
    id: Option<String>,
    genre: String,
    title: String,
    condition: Condition,
    owner: Owner,
    time_slot: String,
    approved: bool,
    available: bool,
    created_at: Option<DateTime<Utc>>,
}

impl BookRecord {
    pub fn builder() -> BookBuilder {
        BookBuilder::new()
    }

    /// 저장소에서 할당한 아이디로 저장 전에는 [`None`]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn genre(&self) -> &str {
        &self.genre
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn condition(&self) -> Condition {
        self.condition
    }

    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    pub fn time_slot(&self) -> &str {
        &self.time_slot
    }

    pub fn is_approved(&self) -> bool {
        self.approved
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// 저장소가 기록한 생성 시각으로 생성 직후 잠깐 동안은 [`None`] 일 수 있다.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn to_builder(&self) -> BookBuilder {
        let mut builder = BookBuilder::new()
            .genre(&self.genre)
            .title(&self.title)
            .condition(self.condition)
            .owner(self.owner.clone())
            .time_slot(&self.time_slot)
            .approved(self.approved)
            .available(self.available);

        if let Some(id) = &self.id {
            builder = builder.id(id);
        }

        if let Some(created_at) = self.created_at {
            builder = builder.created_at(created_at);
        }

        builder
    }

    /// 조회용 뷰로 변환한다. 학번과 이메일은 포함하지 않는다.
    pub fn to_view(&self) -> BookView {
        BookView {
            id: self.id.clone(),
            genre: self.genre.clone(),
            title: self.title.clone(),
            condition: self.condition,
            owner_name: self.owner.name.clone(),
            time_slot: self.time_slot.clone(),
            approved: self.approved,
            available: self.available,
            created_at: self.created_at,
        }
    }

    pub(crate) fn apply(&mut self, patch: &BookPatch) {
        if patch.approve {
            self.approved = true;
        }
        if patch.mark_swapped {
            self.available = false;
        }
    }
}

/// BookRecord 빌더
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BookBuilder {
    id: Option<String>,
    genre: Option<String>,
    title: Option<String>,
    condition: Option<Condition>,
    owner: Option<Owner>,
    time_slot: Option<String>,
    approved: bool,
    available: bool,
    created_at: Option<DateTime<Utc>>,
}

impl BookBuilder {
    pub fn new() -> Self {
        Self {
            id: None,
            genre: None,
            title: None,
            condition: None,
            owner: None,
            time_slot: None,
            approved: false,
            available: true,
            created_at: None,
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_owned());
        self
    }

    pub fn genre(mut self, genre: &str) -> Self {
        self.genre = Some(genre.to_owned());
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_owned());
        self
    }

    pub fn condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn owner(mut self, owner: Owner) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn time_slot(mut self, time_slot: &str) -> Self {
        self.time_slot = Some(time_slot.to_owned());
        self
    }

    pub fn approved(mut self, approved: bool) -> Self {
        self.approved = approved;
        self
    }

    pub fn available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn build(self) -> Result<BookRecord, ItemError> {
        let genre = non_empty(self.genre, "genre")?;
        let title = non_empty(self.title, "title")?;
        let condition = self.condition.ok_or(ItemError::RequireArgumentMissing("condition".to_owned()))?;
        let owner = self.owner.ok_or(ItemError::RequireArgumentMissing("owner".to_owned()))?;

        Ok(BookRecord {
            id: self.id,
            genre,
            title,
            condition,
            owner,
            time_slot: self.time_slot.unwrap_or_default(),
            approved: self.approved,
            available: self.available,
            created_at: self.created_at,
        })
    }
}

impl Default for BookBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn non_empty(value: Option<String>, name: &str) -> Result<String, ItemError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ItemError::RequireArgumentMissing(name.to_owned())),
    }
}

/// 화면이나 CLI 출력 등 외부로 노출되는 도서 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookView {
    pub id: Option<String>,
    pub genre: String,
    pub title: String,
    pub condition: Condition,
    pub owner_name: String,
    pub time_slot: String,
    pub approved: bool,
    pub available: bool,
    pub created_at: Option<DateTime<Utc>>,
}

/// 도서의 부분 갱신
///
/// 도서가 바뀌는 경우는 승인과 교환 완료 두 가지 뿐이라 그 외의 필드는 갱신 할 수 없다.
/// 교환이 끝난 도서를 다시 재고로 되돌리는 갱신 역시 만들 수 없다.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct BookPatch {
    approve: bool,
    mark_swapped: bool,
}

impl BookPatch {
    /// `approved = true`
    pub fn approve() -> Self {
        Self { approve: true, mark_swapped: false }
    }

    /// `available = false`
    pub fn mark_swapped() -> Self {
        Self { approve: false, mark_swapped: true }
    }

    pub fn is_approve(&self) -> bool {
        self.approve
    }

    pub fn is_mark_swapped(&self) -> bool {
        self.mark_swapped
    }

    pub fn is_empty(&self) -> bool {
        !self.approve && !self.mark_swapped
    }
}

/// 도서 요청(관심) 기록
///
/// 장르와 제목은 요청 시점의 도서 정보를 복사해 둔 값으로, 이후 원본 도서가 바뀌거나 삭제 되어도 갱신 하지 않는다.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct InterestRecord {
    id: Option<String>,
    book_id: Option<String>,
    genre: String,
    title: String,
    desired_condition: Option<Condition>,
    requester: Owner,
    time_slot: String,
    created_at: Option<DateTime<Utc>>,
}

impl InterestRecord {
    pub fn builder() -> InterestBuilder {
        InterestBuilder::new()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// 요청 대상 도서의 아이디. 도서와는 관계만 가지며 도서가 삭제 되어도 요청은 유지된다.
    pub fn book_id(&self) -> Option<&str> {
        self.book_id.as_deref()
    }

    pub fn genre(&self) -> &str {
        &self.genre
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn desired_condition(&self) -> Option<Condition> {
        self.desired_condition
    }

    pub fn requester(&self) -> &Owner {
        &self.requester
    }

    pub fn time_slot(&self) -> &str {
        &self.time_slot
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

/// InterestRecord 빌더
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct InterestBuilder {
    id: Option<String>,
    book_id: Option<String>,
    genre: String,
    title: String,
    desired_condition: Option<Condition>,
    requester: Owner,
    time_slot: String,
    created_at: Option<DateTime<Utc>>,
}

impl InterestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_owned());
        self
    }

    pub fn book_id(mut self, book_id: &str) -> Self {
        self.book_id = Some(book_id.to_owned());
        self
    }

    pub fn genre(mut self, genre: &str) -> Self {
        self.genre = genre.to_owned();
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_owned();
        self
    }

    pub fn desired_condition(mut self, condition: Option<Condition>) -> Self {
        self.desired_condition = condition;
        self
    }

    pub fn requester(mut self, requester: Owner) -> Self {
        self.requester = requester;
        self
    }

    pub fn time_slot(mut self, time_slot: &str) -> Self {
        self.time_slot = time_slot.to_owned();
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn build(self) -> InterestRecord {
        InterestRecord {
            id: self.id,
            book_id: self.book_id,
            genre: self.genre,
            title: self.title,
            desired_condition: self.desired_condition,
            requester: self.requester,
            time_slot: self.time_slot,
            created_at: self.created_at,
        }
    }
}

/// 구독으로 전달 되는 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed<T> {
    /// 생성 시각 내림차순으로 정렬된 컬렉션 전체
    Snapshot(Vec<T>),

    /// 실시간 연결이 끊어짐. 이후로는 새로운 스냅샷이 오지 않으므로 다시 구독해야 한다.
    Interrupted(String),
}

/// 컬렉션 구독 핸들
///
/// 구독 직후 현재 스냅샷이 한 번 전달 되며(비어 있을 수 있음), 이후 컬렉션이 바뀔 때마다 스냅샷 전체가 다시 전달 된다.
/// [`Subscription::cancel`]을 호출하거나 핸들을 drop 하면 더 이상 이벤트를 받지 않는다.
pub struct Subscription<T> {
    receiver: mpsc::Receiver<Feed<T>>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl<T> Subscription<T> {
    pub fn new<F>(receiver: mpsc::Receiver<Feed<T>>, cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static
    {
        Self { receiver, cancel: Some(Box::new(cancel)) }
    }

    /// 다음 이벤트를 기다린다. 채널이 닫혔다면 [`Feed::Interrupted`]를 반환한다.
    pub fn recv(&self) -> Feed<T> {
        self.receiver.recv()
            .unwrap_or_else(|_| Feed::Interrupted("subscription channel closed".to_owned()))
    }

    /// 주어진 시간 동안 다음 이벤트를 기다린다. 시간 안에 이벤트가 없으면 [`None`]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Feed<T>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(feed) => Some(feed),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => Some(Feed::Interrupted("subscription channel closed".to_owned())),
        }
    }

    /// 이미 도착해 있는 이벤트 중 가장 마지막 이벤트만 가져온다.
    pub fn latest(&self) -> Option<Feed<T>> {
        let mut latest = None;
        loop {
            match self.receiver.try_recv() {
                Ok(feed) => latest = Some(feed),
                Err(mpsc::TryRecvError::Empty) => return latest,
                Err(mpsc::TryRecvError::Disconnected) => {
                    return latest.or_else(|| Some(Feed::Interrupted("subscription channel closed".to_owned())));
                }
            }
        }
    }

    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.release();
    }
}

/// 도서 저장소
pub trait BookRepository {

    /// 도서를 새로 저장하고 저장소에서 할당한 아이디를 반환한다. 생성 시각은 저장소가 기록한다.
    fn create(&self, book: &BookRecord) -> Result<String, StoreError>;

    /// 아이디로 도서를 찾는다.
    fn find_by_id(&self, id: &str) -> Result<Option<BookRecord>, StoreError>;

    /// 도서의 일부 필드를 갱신한다. 도서가 없다면 [`StoreError::NotFound`]
    fn update_fields(&self, id: &str, patch: &BookPatch) -> Result<(), StoreError>;

    /// 도서를 삭제한다. 이미 삭제된 도서라면 아무것도 하지 않고 `false`를 반환한다.
    fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// 도서 컬렉션을 구독한다.
    fn subscribe(&self) -> Result<Subscription<BookRecord>, StoreError>;
}

/// 도서 요청 저장소
pub trait InterestRepository {

    /// 요청을 새로 저장하고 저장소에서 할당한 아이디를 반환한다.
    fn create(&self, interest: &InterestRecord) -> Result<String, StoreError>;

    /// 요청 컬렉션을 구독한다.
    fn subscribe(&self) -> Result<Subscription<InterestRecord>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Owner {
        Owner::new("Juan Pérez", "juan@espol.edu.ec", "202012345")
    }

    #[test]
    fn builder_defaults_to_pending_and_available() {
        let book = BookRecord::builder()
            .genre("Arte")
            .title("Historia del arte moderno")
            .condition(Condition::Good)
            .owner(owner())
            .time_slot("10:00–10:20")
            .build()
            .unwrap();

        assert!(!book.is_approved());
        assert!(book.is_available());
        assert_eq!(book.id(), None);
        assert_eq!(book.created_at(), None);
    }

    #[test]
    fn builder_rejects_blank_title() {
        let result = BookRecord::builder()
            .genre("Arte")
            .title("   ")
            .condition(Condition::Good)
            .owner(owner())
            .build();

        assert_eq!(result, Err(ItemError::RequireArgumentMissing("title".to_owned())));
    }

    #[test]
    fn view_never_contains_owner_code() {
        let book = BookRecord::builder()
            .genre("Arte")
            .title("Historia del arte moderno")
            .condition(Condition::New)
            .owner(owner())
            .build()
            .unwrap();

        let json = serde_json::to_string(&book.to_view()).unwrap();
        assert!(!json.contains("202012345"));
        assert!(!json.contains("juan@espol.edu.ec"));
        assert!(json.contains("\"condition\":\"Nuevo\""));
    }

    #[test]
    fn condition_accepts_codes_and_names() {
        assert_eq!(Condition::from_str("Bueno"), Ok(Condition::Good));
        assert_eq!(Condition::from_str("acceptable"), Ok(Condition::Acceptable));
        assert_eq!(Condition::try_from("NUEVO"), Ok(Condition::New));
        assert!(Condition::from_str("Roto").is_err());
    }

    #[test]
    fn patch_never_reactivates_swapped_book() {
        let mut book = BookRecord::builder()
            .genre("Arte")
            .title("Historia del arte moderno")
            .condition(Condition::New)
            .owner(owner())
            .available(false)
            .build()
            .unwrap();

        book.apply(&BookPatch::approve());
        assert!(book.is_approved());
        assert!(!book.is_available());
    }

    #[test]
    fn subscription_runs_cancel_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let count = Arc::new(AtomicUsize::new(0));
        let (_sender, receiver) = mpsc::channel::<Feed<BookRecord>>();
        let cloned = count.clone();
        let subscription = Subscription::new(receiver, move || {
            cloned.fetch_add(1, Ordering::SeqCst);
        });

        subscription.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
