use crate::item::{BookRecord, Condition, ItemError, Owner};

/// 행사 예약 시간대
pub const TIME_SLOTS: [&str; 4] = ["10:00–10:20", "10:20–10:40", "10:40–11:00", "11:00–11:20"];

/// 등록 양식에서 선택할 수 있는 장르
pub const GENRES: [&str; 8] = ["Literatura", "Ingeniería", "Matemáticas", "Ciencias", "Economía", "Idiomas", "Arte", "Otros"];

const STOCK: [(&str, &str, Condition, &str); 8] = [
    ("Arte", "Historia del arte moderno", Condition::Good, "10:00–10:20"),
    ("Arte", "Fundamentos de diseño gráfico", Condition::New, "10:20–10:40"),
    ("Ingeniería", "Cálculo de una variable – Stewart", Condition::Good, "10:40–11:00"),
    ("Ingeniería", "Circuitos eléctricos – Nilsson & Riedel", Condition::Acceptable, "11:00–11:20"),
    ("Literatura", "Cien años de soledad", Condition::Good, "10:00–10:20"),
    ("Literatura", "El amor en los tiempos del cólera", Condition::New, "10:20–10:40"),
    ("Ciencias", "Física universitaria – Sears & Zemansky", Condition::Good, "10:40–11:00"),
    ("Idiomas", "Gramática de uso del español B1–B2", Condition::Good, "11:00–11:20"),
];

/// 행사 담당자 계정
pub fn staff() -> Owner {
    Owner::new("Stock inicial ESPOL", "libros@espol.edu.ec", "0000000000")
}

/// 행사 시작 전에 준비된 초기 재고. 모두 승인된 상태다.
pub fn catalog() -> Result<Vec<BookRecord>, ItemError> {
    STOCK.iter()
        .map(|(genre, title, condition, time_slot)| {
            BookRecord::builder()
                .genre(genre)
                .title(title)
                .condition(*condition)
                .owner(staff())
                .time_slot(time_slot)
                .approved(true)
                .build()
        })
        .collect()
}
