use crate::demo;
use crate::registration::{RegistrationRules, DEFAULT_MAX_BOOKS};
use serde::Deserialize;
use std::time::Duration;

fn default_time_slots() -> Vec<String> {
    demo::TIME_SLOTS.iter().map(|s| s.to_string()).collect()
}

fn default_genres() -> Vec<String> {
    demo::GENRES.iter().map(|s| s.to_string()).collect()
}

fn default_max_books() -> usize {
    DEFAULT_MAX_BOOKS
}

/// 행사 설정
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    #[serde(default = "default_time_slots")]
    time_slots: Vec<String>,

    #[serde(default = "default_genres")]
    genres: Vec<String>,

    #[serde(default = "default_max_books")]
    max_books_per_registration: usize,

    /// 교환 받은 도서를 승인 없이 바로 재고로 등록할지 여부
    #[serde(default)]
    approve_swapped_in: bool,

    /// 설정 되어 있다면 새 스냅샷이 없어도 이 주기마다 만료 도서를 다시 확인한다.
    sweep_interval_secs: Option<u64>,
}

impl Event {
    pub fn time_slots(&self) -> &[String] {
        &self.time_slots
    }

    pub fn genres(&self) -> &[String] {
        &self.genres
    }

    pub fn approve_swapped_in(&self) -> bool {
        self.approve_swapped_in
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn rules(&self) -> RegistrationRules {
        RegistrationRules::new(self.time_slots.clone(), self.genres.clone(), self.max_books_per_registration)
    }
}

impl Default for Event {
    fn default() -> Self {
        Self {
            time_slots: default_time_slots(),
            genres: default_genres(),
            max_books_per_registration: default_max_books(),
            approve_swapped_in: false,
            sweep_interval_secs: None,
        }
    }
}
