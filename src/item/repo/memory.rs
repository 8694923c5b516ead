use crate::clock::{Clock, SystemClock};
use crate::item::repo::sort_by_created_desc;
use crate::item::{BookPatch, BookRecord, BookRepository, Feed, InterestRecord, InterestRepository, StoreError, Subscription};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use tracing::debug;

/// 메모리 저장소가 관리하는 문서
trait Stored: Clone + Send + 'static {
    fn stored_id(&self) -> Option<&str>;

    fn stored_at(&self) -> Option<DateTime<Utc>>;

    fn assign(&mut self, id: String, created_at: DateTime<Utc>);
}

impl Stored for BookRecord {
    fn stored_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn stored_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    fn assign(&mut self, id: String, created_at: DateTime<Utc>) {
        self.id = Some(id);
        self.created_at = Some(created_at);
    }
}

impl Stored for InterestRecord {
    fn stored_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn stored_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    fn assign(&mut self, id: String, created_at: DateTime<Utc>) {
        self.id = Some(id);
        self.created_at = Some(created_at);
    }
}

struct State<T> {
    records: Vec<T>,
    next_id: u64,
    subscribers: Vec<(u64, Sender<Feed<T>>)>,
}

/// 컬렉션 하나를 메모리에 보관하는 저장소
///
/// 쓰기가 끝날 때마다 모든 구독자에게 새 스냅샷을 전달하며, 구독자 측 채널이 닫혔다면 구독 목록에서 제거한다.
struct Collection<T: Stored> {
    prefix: &'static str,
    state: Mutex<State<T>>,
    subscriber_seq: AtomicU64,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl<T: Stored> Collection<T> {
    fn new(prefix: &'static str, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            prefix,
            state: Mutex::new(State { records: Vec::new(), next_id: 1, subscribers: Vec::new() }),
            subscriber_seq: AtomicU64::new(1),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, record: &T) -> String {
        let mut state = self.lock();
        let id = format!("{}-{}", self.prefix, state.next_id);
        state.next_id += 1;

        let mut stored = record.clone();
        stored.assign(id.clone(), self.clock.now());
        state.records.push(stored);

        debug!("{} 컬렉션에 문서를 저장 했습니다. (ID: {})", self.prefix, id);
        Self::publish(&mut state);
        id
    }

    fn find(&self, id: &str) -> Option<T> {
        self.lock().records.iter()
            .find(|r| r.stored_id() == Some(id))
            .cloned()
    }

    fn modify<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut T)
    {
        let mut state = self.lock();
        let target = state.records.iter_mut()
            .find(|r| r.stored_id() == Some(id));

        match target {
            Some(record) => {
                f(record);
                Self::publish(&mut state);
                true
            }
            None => false,
        }
    }

    fn remove(&self, id: &str) -> bool {
        let mut state = self.lock();
        let before = state.records.len();
        state.records.retain(|r| r.stored_id() != Some(id));

        if state.records.len() == before {
            return false;
        }
        Self::publish(&mut state);
        true
    }

    fn subscribe(self: &Arc<Self>) -> Subscription<T> {
        let (sender, receiver) = mpsc::channel();
        let key = self.subscriber_seq.fetch_add(1, Ordering::SeqCst);

        {
            let mut state = self.lock();
            let snapshot = Self::snapshot(&state.records);
            // 첫 스냅샷 전송에 실패 했다면 수신측이 이미 없는 것이므로 등록하지 않는다.
            if sender.send(Feed::Snapshot(snapshot)).is_ok() {
                state.subscribers.push((key, sender));
            }
        }

        let collection = Arc::downgrade(self);
        Subscription::new(receiver, move || {
            if let Some(collection) = collection.upgrade() {
                collection.lock().subscribers.retain(|(k, _)| *k != key);
            }
        })
    }

    fn snapshot(records: &[T]) -> Vec<T> {
        let mut snapshot = records.to_vec();
        sort_by_created_desc(&mut snapshot, |r| r.stored_at());
        snapshot
    }

    fn publish(state: &mut State<T>) {
        let snapshot = Self::snapshot(&state.records);
        state.subscribers
            .retain(|(_, sender)| sender.send(Feed::Snapshot(snapshot.clone())).is_ok());
    }

    fn len(&self) -> usize {
        self.lock().records.len()
    }
}

/// 메모리 도서 저장소
///
/// 복제본끼리 같은 컬렉션을 공유한다. 로컬 실행과 테스트에서 외부 저장소 대신 사용한다.
#[derive(Clone)]
pub struct MemoryBookStore {
    collection: Arc<Collection<BookRecord>>,
}

impl MemoryBookStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// 생성 시각을 기록할 때 사용할 시계를 지정한다.
    pub fn with_clock(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self { collection: Arc::new(Collection::new("book", clock)) }
    }

    pub fn len(&self) -> usize {
        self.collection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryBookStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BookRepository for MemoryBookStore {
    fn create(&self, book: &BookRecord) -> Result<String, StoreError> {
        Ok(self.collection.insert(book))
    }

    fn find_by_id(&self, id: &str) -> Result<Option<BookRecord>, StoreError> {
        Ok(self.collection.find(id))
    }

    fn update_fields(&self, id: &str, patch: &BookPatch) -> Result<(), StoreError> {
        if self.collection.modify(id, |book| book.apply(patch)) {
            Ok(())
        } else {
            Err(StoreError::NotFound(id.to_owned()))
        }
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.collection.remove(id))
    }

    fn subscribe(&self) -> Result<Subscription<BookRecord>, StoreError> {
        Ok(self.collection.subscribe())
    }
}

/// 메모리 도서 요청 저장소
#[derive(Clone)]
pub struct MemoryInterestStore {
    collection: Arc<Collection<InterestRecord>>,
}

impl MemoryInterestStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self { collection: Arc::new(Collection::new("interest", clock)) }
    }

    pub fn len(&self) -> usize {
        self.collection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryInterestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InterestRepository for MemoryInterestStore {
    fn create(&self, interest: &InterestRecord) -> Result<String, StoreError> {
        Ok(self.collection.insert(interest))
    }

    fn subscribe(&self) -> Result<Subscription<InterestRecord>, StoreError> {
        Ok(self.collection.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::item::{Condition, Owner};
    use chrono::{Duration, TimeZone};

    fn book(title: &str) -> BookRecord {
        BookRecord::builder()
            .genre("Literatura")
            .title(title)
            .condition(Condition::Good)
            .owner(Owner::new("Ana", "ana@espol.edu.ec", "202011111"))
            .time_slot("10:00–10:20")
            .build()
            .unwrap()
    }

    fn snapshot<T>(feed: Feed<T>) -> Vec<T> {
        match feed {
            Feed::Snapshot(records) => records,
            Feed::Interrupted(reason) => panic!("unexpected interruption: {}", reason),
        }
    }

    #[test]
    fn first_event_is_current_snapshot_even_when_empty() {
        let store = MemoryBookStore::new();
        let subscription = store.subscribe().unwrap();

        assert!(snapshot(subscription.recv()).is_empty());
    }

    #[test]
    fn snapshot_is_ordered_by_created_at_descending() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 10, 28, 10, 0, 0).unwrap());
        let store = MemoryBookStore::with_clock(Arc::new(clock.clone()));

        store.create(&book("first")).unwrap();
        clock.advance(Duration::minutes(1));
        store.create(&book("second")).unwrap();

        let subscription = store.subscribe().unwrap();
        let titles = snapshot(subscription.recv()).iter()
            .map(|b| b.title().to_owned())
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["second", "first"]);
    }

    #[test]
    fn every_write_pushes_a_new_snapshot() {
        let store = MemoryBookStore::new();
        let subscription = store.subscribe().unwrap();
        assert!(snapshot(subscription.recv()).is_empty());

        let id = store.create(&book("Rayuela")).unwrap();
        assert_eq!(snapshot(subscription.recv()).len(), 1);

        store.update_fields(&id, &BookPatch::approve()).unwrap();
        let books = snapshot(subscription.recv());
        assert!(books[0].is_approved());

        assert!(store.delete(&id).unwrap());
        assert!(snapshot(subscription.recv()).is_empty());
    }

    #[test]
    fn deleting_missing_book_is_a_noop() {
        let store = MemoryBookStore::new();
        let id = store.create(&book("Rayuela")).unwrap();

        assert!(store.delete(&id).unwrap());
        assert!(!store.delete(&id).unwrap());
    }

    #[test]
    fn updating_missing_book_is_not_found() {
        let store = MemoryBookStore::new();
        let result = store.update_fields("book-99", &BookPatch::approve());

        assert_eq!(result, Err(StoreError::NotFound("book-99".to_owned())));
    }

    #[test]
    fn cancelled_subscription_stops_receiving() {
        let store = MemoryBookStore::new();
        let subscription = store.subscribe().unwrap();
        subscription.cancel();

        store.create(&book("Rayuela")).unwrap();
        assert_eq!(store.collection.lock().subscribers.len(), 0);
    }

    #[test]
    fn dropped_subscription_is_unregistered() {
        let store = MemoryBookStore::new();
        {
            let _subscription = store.subscribe().unwrap();
            assert_eq!(store.collection.lock().subscribers.len(), 1);
        }

        store.create(&book("Rayuela")).unwrap();
        assert_eq!(store.collection.lock().subscribers.len(), 0);
    }

    #[test]
    fn interests_survive_deleting_the_referenced_book() {
        let books = MemoryBookStore::new();
        let interests = MemoryInterestStore::new();

        let book_id = books.create(&book("Rayuela")).unwrap();
        let stored = books.find_by_id(&book_id).unwrap().unwrap();
        for condition in [Condition::New, Condition::Acceptable] {
            let interest = InterestRecord::builder()
                .book_id(&book_id)
                .genre(stored.genre())
                .title(stored.title())
                .desired_condition(Some(condition))
                .requester(Owner::new("Luis", "luis@espol.edu.ec", "202022222"))
                .time_slot("10:20–10:40")
                .build();
            interests.create(&interest).unwrap();
        }

        books.delete(&book_id).unwrap();

        let subscription = interests.subscribe().unwrap();
        let stored_interests = snapshot(subscription.recv());
        assert_eq!(stored_interests.len(), 2);
        assert!(stored_interests.iter().all(|i| i.title() == "Rayuela" && i.book_id() == Some(book_id.as_str())));
        let mut conditions = stored_interests.iter()
            .filter_map(|i| i.desired_condition())
            .collect::<Vec<_>>();
        conditions.sort_by_key(|c| c.to_code_str());
        assert_eq!(conditions, vec![Condition::Acceptable, Condition::New]);
    }
}
