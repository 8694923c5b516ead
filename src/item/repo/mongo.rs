use crate::item::{BookPatch, BookRecord, BookRepository, Condition, Feed, InterestRecord, InterestRepository, Owner, StoreError, Subscription};
use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, DateTime as BsonDateTime, Document};
use mongodb::sync::{Collection, Database};
use serde::de::{DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{serde_as, DeserializeAs, SerializeAs};
use std::fmt::Formatter;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tracing::{debug, error};

const BOOK_COLLECTION: &str = "books";
const INTEREST_COLLECTION: &str = "interests";

struct ConditionCode {}

impl SerializeAs<Condition> for ConditionCode {
    fn serialize_as<S>(source: &Condition, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer
    {
        serializer.collect_str(&source.to_code_str())
    }
}

impl<'de> DeserializeAs<'de, Condition> for ConditionCode {
    fn deserialize_as<D>(deserializer: D) -> Result<Condition, D::Error>
    where
        D: Deserializer<'de>
    {
        struct Helper(PhantomData<Condition>);
        impl Visitor<'_> for Helper {
            type Value = Condition;

            fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
                formatter.write_str("a string representing a Condition code")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Condition::from_str(v).map_err(|e| serde::de::Error::custom(e.to_string()))
            }
        }
        deserializer.deserialize_str(Helper(PhantomData))
    }
}

fn default_available() -> bool {
    true
}

fn to_chrono(dt: BsonDateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(dt.timestamp_millis())
}

fn parse_object_id(id: &str) -> Option<ObjectId> {
    ObjectId::parse_str(id).ok()
}

/// `books` 컬렉션의 문서
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,

    genre: String,

    title: String,

    #[serde_as(as = "ConditionCode")]
    condition: Condition,

    owner_name: String,

    owner_email: String,

    owner_code: String,

    time_slot: String,

    #[serde(default)]
    approved: bool,

    #[serde(default = "default_available")]
    available: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<BsonDateTime>,
}

impl BookDocument {

    /// 새로 저장할 문서를 만든다. 아이디와 생성 시각은 저장소가 할당하므로 비워둔다.
    pub fn new_from_domain(book: &BookRecord) -> Self {
        Self {
            id: None,
            genre: book.genre().to_owned(),
            title: book.title().to_owned(),
            condition: book.condition(),
            owner_name: book.owner().name().to_owned(),
            owner_email: book.owner().email().to_owned(),
            owner_code: book.owner().code().to_owned(),
            time_slot: book.time_slot().to_owned(),
            approved: book.is_approved(),
            available: book.is_available(),
            created_at: None,
        }
    }

    pub fn to_domain(self) -> Result<BookRecord, StoreError> {
        let mut builder = BookRecord::builder()
            .genre(&self.genre)
            .title(&self.title)
            .condition(self.condition)
            .owner(Owner::new(&self.owner_name, &self.owner_email, &self.owner_code))
            .time_slot(&self.time_slot)
            .approved(self.approved)
            .available(self.available);

        if let Some(id) = self.id {
            builder = builder.id(&id.to_hex());
        }

        if let Some(created_at) = self.created_at.and_then(to_chrono) {
            builder = builder.created_at(created_at);
        }

        builder.build()
            .map_err(|e| StoreError::Convert(format!("{} (ID: {:?})", e, self.id)))
    }
}

/// `interests` 컬렉션의 문서
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestDocument {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    book_id: Option<String>,

    genre: String,

    title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    desired_condition: Option<String>,

    requester_name: String,

    requester_email: String,

    requester_code: String,

    time_slot: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<BsonDateTime>,
}

impl InterestDocument {

    pub fn new_from_domain(interest: &InterestRecord) -> Self {
        Self {
            id: None,
            book_id: interest.book_id().map(|id| id.to_owned()),
            genre: interest.genre().to_owned(),
            title: interest.title().to_owned(),
            desired_condition: interest.desired_condition().map(|c| c.to_code_str().to_owned()),
            requester_name: interest.requester().name().to_owned(),
            requester_email: interest.requester().email().to_owned(),
            requester_code: interest.requester().code().to_owned(),
            time_slot: interest.time_slot().to_owned(),
            created_at: None,
        }
    }

    pub fn to_domain(self) -> Result<InterestRecord, StoreError> {
        let desired_condition = self.desired_condition.as_deref()
            .map(Condition::from_str)
            .transpose()
            .map_err(|e| StoreError::Convert(format!("{} (ID: {:?})", e, self.id)))?;

        let mut builder = InterestRecord::builder()
            .genre(&self.genre)
            .title(&self.title)
            .desired_condition(desired_condition)
            .requester(Owner::new(&self.requester_name, &self.requester_email, &self.requester_code))
            .time_slot(&self.time_slot);

        if let Some(id) = self.id {
            builder = builder.id(&id.to_hex());
        }

        if let Some(book_id) = &self.book_id {
            builder = builder.book_id(book_id);
        }

        if let Some(created_at) = self.created_at.and_then(to_chrono) {
            builder = builder.created_at(created_at);
        }

        Ok(builder.build())
    }
}

/// MongoDB 도서 저장소
///
/// 실시간 구독은 change stream을 사용하므로 MongoDB가 replica set으로 구성 되어 있어야 한다.
pub struct BookMongoStore {
    collection: Collection<BookDocument>,
    poll_interval: Duration,
}

impl BookMongoStore {
    pub fn new(database: &Database, poll_interval: Duration) -> Self {
        Self {
            collection: database.collection::<BookDocument>(BOOK_COLLECTION),
            poll_interval,
        }
    }
}

impl BookRepository for BookMongoStore {
    fn create(&self, book: &BookRecord) -> Result<String, StoreError> {
        insert_with_server_time(&self.collection, &BookDocument::new_from_domain(book))
    }

    fn find_by_id(&self, id: &str) -> Result<Option<BookRecord>, StoreError> {
        let Some(oid) = parse_object_id(id) else {
            return Ok(None);
        };

        let found = self.collection.find_one(doc! { "_id": oid }).run()
            .map_err(|e| StoreError::Query(e.to_string()))?;

        found.map(BookDocument::to_domain).transpose()
    }

    fn update_fields(&self, id: &str, patch: &BookPatch) -> Result<(), StoreError> {
        let oid = parse_object_id(id)
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))?;

        let mut set = Document::new();
        if patch.is_approve() {
            set.insert("approved", true);
        }
        if patch.is_mark_swapped() {
            set.insert("available", false);
        }
        if set.is_empty() {
            return Ok(());
        }

        let result = self.collection.update_one(doc! { "_id": oid }, doc! { "$set": set }).run()
            .map_err(|e| StoreError::Write(e.to_string()))?;

        if result.matched_count == 0 {
            return Err(StoreError::NotFound(id.to_owned()));
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let Some(oid) = parse_object_id(id) else {
            return Ok(false);
        };

        let result = self.collection.delete_one(doc! { "_id": oid }).run()
            .map_err(|e| StoreError::Write(e.to_string()))?;

        Ok(result.deleted_count > 0)
    }

    fn subscribe(&self) -> Result<Subscription<BookRecord>, StoreError> {
        watch(self.collection.clone(), self.poll_interval, BookDocument::to_domain)
    }
}

/// MongoDB 도서 요청 저장소
pub struct InterestMongoStore {
    collection: Collection<InterestDocument>,
    poll_interval: Duration,
}

impl InterestMongoStore {
    pub fn new(database: &Database, poll_interval: Duration) -> Self {
        Self {
            collection: database.collection::<InterestDocument>(INTEREST_COLLECTION),
            poll_interval,
        }
    }
}

impl InterestRepository for InterestMongoStore {
    fn create(&self, interest: &InterestRecord) -> Result<String, StoreError> {
        insert_with_server_time(&self.collection, &InterestDocument::new_from_domain(interest))
    }

    fn subscribe(&self) -> Result<Subscription<InterestRecord>, StoreError> {
        watch(self.collection.clone(), self.poll_interval, InterestDocument::to_domain)
    }
}

/// 새 문서를 저장하면서 `created_at`을 서버 시각(`$currentDate`)으로 기록한다.
fn insert_with_server_time<D>(collection: &Collection<D>, entity: &D) -> Result<String, StoreError>
where
    D: Serialize + Send + Sync
{
    let fields = mongodb::bson::to_document(entity)
        .map_err(|e| StoreError::Convert(e.to_string()))?;
    let id = ObjectId::new();

    collection
        .update_one(doc! { "_id": id }, doc! { "$set": fields, "$currentDate": { "created_at": true } })
        .upsert(true)
        .run()
        .map_err(|e| StoreError::Write(e.to_string()))?;

    debug!("{} 컬렉션에 문서를 저장 했습니다. (ID: {})", collection.name(), id);
    Ok(id.to_hex())
}

fn read_snapshot<D, T>(collection: &Collection<D>, convert: fn(D) -> Result<T, StoreError>) -> Result<Vec<T>, StoreError>
where
    D: DeserializeOwned + Unpin + Send + Sync
{
    let cursor = collection.find(doc! {}).sort(doc! { "created_at": -1 }).run()
        .map_err(|e| StoreError::Query(e.to_string()))?;

    let documents = cursor
        .collect::<Result<Vec<D>, mongodb::error::Error>>()
        .map_err(|e| StoreError::Query(e.to_string()))?;

    documents.into_iter().map(convert).collect()
}

/// change stream으로 컬렉션 변경을 감시하며 변경이 있을 때마다 전체 스냅샷을 다시 읽어 전달한다.
///
/// 감시는 별도 스레드에서 이루어지고, 구독이 취소 되거나 수신측이 사라지면 스레드는 종료된다.
fn watch<D, T>(
    collection: Collection<D>,
    poll_interval: Duration,
    convert: fn(D) -> Result<T, StoreError>,
) -> Result<Subscription<T>, StoreError>
where
    D: DeserializeOwned + Unpin + Send + Sync + 'static,
    T: Send + 'static
{
    // 스트림을 먼저 열어야 첫 스냅샷 이후의 변경을 놓치지 않는다.
    let mut stream = collection.clone_with_type::<Document>().watch().run()
        .map_err(|e| StoreError::Connect(e.to_string()))?;
    let initial = read_snapshot(&collection, convert)?;

    let (sender, receiver) = mpsc::channel();
    _ = sender.send(Feed::Snapshot(initial));

    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();
    let name = collection.name().to_owned();

    thread::spawn(move || {
        while !flag.load(Ordering::SeqCst) {
            match stream.next_if_any() {
                Ok(Some(_)) => {
                    let feed = match read_snapshot(&collection, convert) {
                        Ok(records) => Feed::Snapshot(records),
                        Err(e) => {
                            error!("{} 컬렉션 스냅샷 조회 중 에러가 발생 하였습니다. => {:?}", name, e);
                            Feed::Interrupted(e.to_string())
                        }
                    };
                    let interrupted = matches!(feed, Feed::Interrupted(_));
                    if sender.send(feed).is_err() || interrupted {
                        break;
                    }
                }
                Ok(None) => thread::sleep(poll_interval),
                Err(e) => {
                    error!("{} 컬렉션 change stream이 중단 되었습니다. => {:?}", name, e);
                    _ = sender.send(Feed::Interrupted(e.to_string()));
                    break;
                }
            }
        }
        debug!("{} 컬렉션 감시를 종료 합니다.", name);
    });

    Ok(Subscription::new(receiver, move || cancelled.store(true, Ordering::SeqCst)))
}
