use crate::item::{BookRecord, BookRepository, Condition, InterestRecord, InterestRepository, Owner, StoreError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::LazyLock;
use tracing::{error, info};

pub use crate::item::ValidationError;

/// 사전 등록 한 번에 가져올 수 있는 최대 도서 수
pub const DEFAULT_MAX_BOOKS: usize = 2;

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

/// 등록 에러
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// 입력 값 검증 실패. 아무것도 저장 되지 않는다.
    Invalid(ValidationError),

    /// 저장 중 실패. `created`는 실패 전까지 저장된 도서의 아이디
    Store {
        created: Vec<String>,
        cause: StoreError,
    },
}

impl Display for RegistrationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationError::Invalid(e) => write!(f, "Invalid registration: {}", e),
            RegistrationError::Store { created, cause } => {
                write!(f, "Registration failed after {} book(s) were saved: {}", created.len(), cause)
            }
        }
    }
}

impl std::error::Error for RegistrationError {}

impl From<ValidationError> for RegistrationError {
    fn from(value: ValidationError) -> Self {
        RegistrationError::Invalid(value)
    }
}

/// 등록 검증 규칙
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRules {
    time_slots: Vec<String>,
    genres: Vec<String>,
    max_books: usize,
}

impl RegistrationRules {
    /// `time_slots`나 `genres`가 비어 있다면 해당 값은 비어 있지만 않으면 모두 허용한다.
    pub fn new(time_slots: Vec<String>, genres: Vec<String>, max_books: usize) -> Self {
        Self { time_slots, genres, max_books }
    }

    pub fn time_slots(&self) -> &[String] {
        &self.time_slots
    }

    pub fn genres(&self) -> &[String] {
        &self.genres
    }

    pub fn max_books(&self) -> usize {
        self.max_books
    }

    fn check_requester(&self, name: &str, email: &str, code: &str, time_slot: &str, errors: &mut ValidationError) {
        if name.trim().is_empty() {
            errors.add("name", "El nombre es obligatorio");
        }
        if email.trim().is_empty() {
            errors.add("email", "El correo es obligatorio");
        } else if !EMAIL_REGEX.is_match(email.trim()) {
            errors.add("email", "Formato de correo inválido");
        }
        if code.trim().is_empty() {
            errors.add("code", "El código es obligatorio");
        }
        if time_slot.trim().is_empty() {
            errors.add("time_slot", "Selecciona un horario");
        } else if !self.time_slots.is_empty() && !self.time_slots.iter().any(|s| s == time_slot.trim()) {
            errors.add("time_slot", "Horario no disponible");
        }
    }
}

impl Default for RegistrationRules {
    fn default() -> Self {
        Self::new(
            crate::demo::TIME_SLOTS.iter().map(|s| s.to_string()).collect(),
            crate::demo::GENRES.iter().map(|s| s.to_string()).collect(),
            DEFAULT_MAX_BOOKS,
        )
    }
}

/// 등록할 때 함께 가져오는 도서
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OfferedBook {
    pub genre: String,
    pub title: String,

    /// 상태 코드(`Nuevo`, `Bueno`, `Aceptable`)
    pub condition: String,
}

impl OfferedBook {
    pub fn new(genre: &str, title: &str, condition: Condition) -> Self {
        Self {
            genre: genre.to_owned(),
            title: title.to_owned(),
            condition: condition.to_code_str().to_owned(),
        }
    }
}

/// 행사 사전 등록 양식
///
/// 도서 없이 시간대만 예약하는 것도 허용한다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub code: String,
    pub time_slot: String,
    pub books: Vec<OfferedBook>,
}

impl Registration {
    pub fn new(name: &str, email: &str, code: &str, time_slot: &str) -> Self {
        Self {
            name: name.to_owned(),
            email: email.to_owned(),
            code: code.to_owned(),
            time_slot: time_slot.to_owned(),
            books: Vec::new(),
        }
    }

    /// 도서를 추가한다. 이미 최대 수 만큼 추가 되어 있다면 `false`를 반환하고 아무것도 하지 않는다.
    pub fn add_book(&mut self, book: OfferedBook, rules: &RegistrationRules) -> bool {
        if self.books.len() >= rules.max_books {
            return false;
        }
        self.books.push(book);
        true
    }

    pub fn remove_book(&mut self, index: usize) -> Option<OfferedBook> {
        if index < self.books.len() {
            Some(self.books.remove(index))
        } else {
            None
        }
    }

    pub fn owner(&self) -> Owner {
        Owner::new(self.name.trim(), self.email.trim(), self.code.trim())
    }

    /// 양식을 검증한다. 에러는 `name`, `email`, `code`, `time_slot`, `books`, `books[0].title` 같은 필드 경로로 구분된다.
    pub fn validate(&self, rules: &RegistrationRules) -> Result<(), ValidationError> {
        let mut errors = ValidationError::new();
        rules.check_requester(&self.name, &self.email, &self.code, &self.time_slot, &mut errors);

        if self.books.len() > rules.max_books {
            errors.add("books", &format!("Máximo {} libros por registro", rules.max_books));
        }

        for (index, book) in self.books.iter().enumerate() {
            if book.genre.trim().is_empty() {
                errors.add(&format!("books[{}].genre", index), "Selecciona un género");
            } else if !rules.genres.is_empty() && !rules.genres.iter().any(|g| g == book.genre.trim()) {
                errors.add(&format!("books[{}].genre", index), "Género no disponible");
            }
            if book.title.trim().is_empty() {
                errors.add(&format!("books[{}].title", index), "El título es obligatorio");
            }
            if book.condition.trim().is_empty() {
                errors.add(&format!("books[{}].condition", index), "Selecciona un estado");
            } else if Condition::from_str(&book.condition).is_err() {
                errors.add(&format!("books[{}].condition", index), "Estado desconocido");
            }
        }

        errors.into_result()
    }

    fn to_records(&self) -> Result<Vec<BookRecord>, ValidationError> {
        let owner = self.owner();
        self.books.iter().enumerate()
            .map(|(index, book)| {
                let condition = Condition::from_str(&book.condition)
                    .map_err(|e| single_error(&format!("books[{}].condition", index), &e.to_string()))?;
                BookRecord::builder()
                    .genre(book.genre.trim())
                    .title(book.title.trim())
                    .condition(condition)
                    .owner(owner.clone())
                    .time_slot(self.time_slot.trim())
                    .build()
                    .map_err(|e| single_error(&format!("books[{}]", index), &e.to_string()))
            })
            .collect()
    }
}

fn single_error(field: &str, message: &str) -> ValidationError {
    let mut errors = ValidationError::new();
    errors.add(field, message);
    errors
}

/// 등록 완료 안내
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Confirmation {
    pub first_name: String,
    pub time_slot: String,
    pub book_count: usize,
    pub book_ids: Vec<String>,
}

/// 양식을 검증한 뒤 도서를 하나씩 승인 대기 상태로 저장한다.
///
/// 검증에 실패하면 아무것도 저장하지 않는다. 저장 중 실패하면 그 전까지 저장된 도서는 그대로 남는다.
pub fn submit<R>(store: &R, registration: &Registration, rules: &RegistrationRules) -> Result<Confirmation, RegistrationError>
where
    R: BookRepository + ?Sized
{
    registration.validate(rules)?;
    let records = registration.to_records()?;

    let mut created = Vec::with_capacity(records.len());
    for record in &records {
        match store.create(record) {
            Ok(id) => created.push(id),
            Err(cause) => {
                error!("사전 등록 도서 저장 중 에러가 발생 하였습니다. ({}/{} 저장 완료) => {:?}", created.len(), records.len(), cause);
                return Err(RegistrationError::Store { created, cause });
            }
        }
    }

    info!("사전 등록을 완료 했습니다. (시간대: {}, 도서: {}권)", registration.time_slot.trim(), created.len());
    Ok(Confirmation {
        first_name: registration.name.split_whitespace().next().unwrap_or_default().to_owned(),
        time_slot: registration.time_slot.trim().to_owned(),
        book_count: created.len(),
        book_ids: created,
    })
}

/// 도서 요청을 저장한다.
///
/// 요청 시점의 도서 장르와 제목을 복사해 두며 이후 도서가 바뀌어도 요청은 바뀌지 않는다.
pub fn register_interest<R>(
    store: &R,
    book: &BookRecord,
    requester: &Owner,
    desired_condition: Option<Condition>,
    time_slot: &str,
    rules: &RegistrationRules,
) -> Result<String, RegistrationError>
where
    R: InterestRepository + ?Sized
{
    let mut errors = ValidationError::new();
    rules.check_requester(requester.name(), requester.email(), requester.code(), time_slot, &mut errors);
    errors.into_result()?;

    let mut builder = InterestRecord::builder()
        .genre(book.genre())
        .title(book.title())
        .desired_condition(desired_condition)
        .requester(Owner::new(requester.name().trim(), requester.email().trim(), requester.code().trim()))
        .time_slot(time_slot.trim());
    if let Some(id) = book.id() {
        builder = builder.book_id(id);
    }

    let id = store.create(&builder.build())
        .map_err(|cause| RegistrationError::Store { created: Vec::new(), cause })?;
    info!("도서 요청을 저장 했습니다. (ID: {}, 제목: {})", id, book.title());
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::repo::{MemoryBookStore, MemoryInterestStore};
    use crate::item::Feed;

    fn registration() -> Registration {
        let mut registration = Registration::new("Juan Carlos Pérez", "jperez@espol.edu.ec", "202012345", "10:00–10:20");
        registration.books.push(OfferedBook::new("Literatura", "Cien años de soledad", Condition::Good));
        registration
    }

    #[test]
    fn valid_registration_creates_pending_books() {
        let store = MemoryBookStore::new();
        let confirmation = submit(&store, &registration(), &RegistrationRules::default()).unwrap();

        assert_eq!(confirmation.first_name, "Juan");
        assert_eq!(confirmation.time_slot, "10:00–10:20");
        assert_eq!(confirmation.book_count, 1);

        let book = store.find_by_id(&confirmation.book_ids[0]).unwrap().unwrap();
        assert!(!book.is_approved());
        assert!(book.is_available());
        assert_eq!(book.owner().code(), "202012345");
        assert_eq!(book.time_slot(), "10:00–10:20");
    }

    #[test]
    fn missing_fields_are_reported_per_field_and_nothing_is_saved() {
        let store = MemoryBookStore::new();
        let mut form = Registration::new(" ", "no-es-correo", "", "");
        form.books.push(OfferedBook { genre: "Arte".to_owned(), title: "".to_owned(), condition: "".to_owned() });

        let errors = match submit(&store, &form, &RegistrationRules::default()) {
            Err(RegistrationError::Invalid(errors)) => errors,
            other => panic!("unexpected result: {:?}", other),
        };

        assert_eq!(errors.get("name"), Some("El nombre es obligatorio"));
        assert_eq!(errors.get("email"), Some("Formato de correo inválido"));
        assert_eq!(errors.get("code"), Some("El código es obligatorio"));
        assert_eq!(errors.get("time_slot"), Some("Selecciona un horario"));
        assert_eq!(errors.get("books[0].title"), Some("El título es obligatorio"));
        assert_eq!(errors.get("books[0].condition"), Some("Selecciona un estado"));
        assert_eq!(errors.get("books[0].genre"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn unknown_time_slot_is_rejected() {
        let mut form = registration();
        form.time_slot = "15:00–15:20".to_owned();

        let errors = form.validate(&RegistrationRules::default()).unwrap_err();
        assert_eq!(errors.get("time_slot"), Some("Horario no disponible"));
    }

    #[test]
    fn open_time_slots_accept_any_label() {
        let mut form = registration();
        form.time_slot = "15:00–15:20".to_owned();

        assert!(form.validate(&RegistrationRules::new(Vec::new(), Vec::new(), 2)).is_ok());
    }

    #[test]
    fn unknown_genre_is_rejected() {
        let store = MemoryBookStore::new();
        let mut form = registration();
        form.books.push(OfferedBook::new("Astrología", "Cartas natales", Condition::Good));

        let errors = match submit(&store, &form, &RegistrationRules::default()) {
            Err(RegistrationError::Invalid(errors)) => errors,
            other => panic!("unexpected result: {:?}", other),
        };

        assert_eq!(errors.get("books[1].genre"), Some("Género no disponible"));
        assert_eq!(errors.get("books[0].genre"), None);
        assert_eq!(errors.fields().keys().map(String::as_str).collect::<Vec<_>>(), vec!["books[1].genre"]);
        assert!(store.is_empty());
    }

    #[test]
    fn open_genres_accept_any_label() {
        let mut form = registration();
        form.books[0].genre = "Astrología".to_owned();
        let rules = RegistrationRules::new(RegistrationRules::default().time_slots().to_vec(), Vec::new(), 2);

        assert!(rules.genres().is_empty());
        assert!(form.validate(&rules).is_ok());
    }

    #[test]
    fn add_book_refuses_a_third_book() {
        let rules = RegistrationRules::default();
        let mut form = registration();

        assert!(form.add_book(OfferedBook::new("Arte", "Color", Condition::New), &rules));
        assert!(!form.add_book(OfferedBook::new("Arte", "Forma", Condition::New), &rules));
        assert_eq!(form.books.len(), 2);

        assert_eq!(form.remove_book(0).map(|b| b.title), Some("Cien años de soledad".to_owned()));
        assert_eq!(form.remove_book(5), None);
        assert_eq!(form.books.len(), 1);
    }

    #[test]
    fn too_many_books_fail_validation() {
        let mut form = registration();
        form.books.push(OfferedBook::new("Arte", "Color", Condition::New));
        form.books.push(OfferedBook::new("Arte", "Forma", Condition::New));

        let errors = form.validate(&RegistrationRules::default()).unwrap_err();
        assert!(errors.get("books").is_some());
    }

    #[test]
    fn registration_without_books_only_reserves_the_slot() {
        let store = MemoryBookStore::new();
        let mut form = registration();
        form.books.clear();

        let confirmation = submit(&store, &form, &RegistrationRules::default()).unwrap();
        assert_eq!(confirmation.book_count, 0);
        assert!(store.is_empty());
    }

    #[test]
    fn form_is_read_from_json() {
        let json = r#"{
            "name": "Ana",
            "email": "ana@espol.edu.ec",
            "code": "202011111",
            "time_slot": "10:40–11:00",
            "books": [{ "genre": "Idiomas", "title": "English Grammar in Use", "condition": "Nuevo" }]
        }"#;

        let form: Registration = serde_json::from_str(json).unwrap();
        assert!(form.validate(&RegistrationRules::default()).is_ok());
        assert_eq!(form.books[0].condition, "Nuevo");
    }

    #[test]
    fn interests_keep_their_snapshot_after_the_book_is_deleted() {
        let books = MemoryBookStore::new();
        let interests = MemoryInterestStore::new();
        let rules = RegistrationRules::default();
        let requester = Owner::new("Luis", "luis@espol.edu.ec", "202022222");

        let book_id = books.create(&registration().to_records().unwrap()[0]).unwrap();
        let book = books.find_by_id(&book_id).unwrap().unwrap();

        register_interest(&interests, &book, &requester, Some(Condition::New), "11:00–11:20", &rules).unwrap();
        register_interest(&interests, &book, &requester, Some(Condition::Acceptable), "11:00–11:20", &rules).unwrap();
        assert!(books.delete(&book_id).unwrap());

        let records = match interests.subscribe().unwrap().recv() {
            Feed::Snapshot(records) => records,
            other => panic!("unexpected feed: {:?}", other),
        };
        assert_eq!(records.len(), 2);
        for record in &records {
            assert_eq!(record.book_id(), Some(book_id.as_str()));
            assert_eq!(record.genre(), "Literatura");
            assert_eq!(record.title(), "Cien años de soledad");
        }
        let mut conditions = records.iter().filter_map(|r| r.desired_condition()).collect::<Vec<_>>();
        conditions.sort_by_key(|c| c.to_code_str());
        assert_eq!(conditions, vec![Condition::Acceptable, Condition::New]);
    }

    #[test]
    fn interest_requires_a_valid_requester() {
        let interests = MemoryInterestStore::new();
        let book = registration().to_records().unwrap().remove(0);

        let result = register_interest(&interests, &book, &Owner::new("Luis", "luis", ""), None, "11:00–11:20", &RegistrationRules::default());
        match result {
            Err(RegistrationError::Invalid(errors)) => {
                assert!(errors.get("email").is_some());
                assert!(errors.get("code").is_some());
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(interests.is_empty());
    }
}
