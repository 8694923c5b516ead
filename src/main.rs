use book_swap_rust::board::{Board, BoardError, BoardView};
use book_swap_rust::clock::SystemClock;
use book_swap_rust::config;
use book_swap_rust::config::Event;
use book_swap_rust::interest;
use book_swap_rust::item::repo::{BookMongoStore, InterestMongoStore, MemoryBookStore, MemoryInterestStore};
use book_swap_rust::item::{BookRecord, BookRepository, Condition, Feed, InterestRepository, Owner, StoreError, Subscription};
use book_swap_rust::lifecycle::{self, SwapError, ALL_GENRES};
use book_swap_rust::registration::{self, Registration};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::error::Error;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

/// 구독이 끊어졌을 때 다시 구독 하기까지 기다리는 시간
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(3);

/// 타이머가 설정 되지 않았을 때 화면을 다시 그리는 주기
const IDLE_REDRAW: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "book-swap", about = "Book swap event back office", version)]
struct Cli {
    /// Use an in-memory store seeded with the demo stock instead of MongoDB
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Follow the live book feed, sweeping expired pre-registrations
    Watch,

    /// List the swap stock. Read-only: expired pre-registrations are hidden but not deleted
    List {
        /// Case-insensitive title substring
        #[arg(long, default_value = "")]
        search: String,

        #[arg(long, default_value = ALL_GENRES)]
        genre: String,
    },

    /// List pre-registrations waiting for approval. Read-only: expired ones are hidden but not deleted
    Pending,

    /// Approve a pre-registered book
    Approve {
        id: String,
    },

    /// Mark a stock book as swapped and register the book received for it
    Swap {
        id: String,

        #[arg(long)]
        genre: Option<String>,

        #[arg(long)]
        title: String,
    },

    /// Submit a registration form read from a JSON file
    Register {
        #[arg(long)]
        file: PathBuf,
    },

    /// Request a book
    Interest {
        #[arg(long)]
        book_id: String,

        #[arg(long)]
        name: String,

        #[arg(long)]
        email: String,

        #[arg(long)]
        code: String,

        #[arg(long)]
        slot: String,

        /// Nuevo, Bueno or Aceptable
        #[arg(long)]
        condition: Option<String>,
    },

    /// Show request statistics
    Stats,

    /// Register the demo stock
    Seed,

    /// Delete expired pre-registrations
    Sweep,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    config::load_dotenv();
    let app_config = config::load_config()?;
    let _guard = config::log::set_global_logging_config(app_config.logger())?;

    let result = if cli.memory {
        let books = MemoryBookStore::new();
        let interests = MemoryInterestStore::new();
        lifecycle::seed(&books, &book_swap_rust::demo::catalog()?)?;
        run(cli.command, books, interests, app_config.event())
    } else {
        let database = config::connect_to_mongo(app_config.mongo())?;
        let poll_interval = app_config.mongo().poll_interval();
        let books = BookMongoStore::new(&database, poll_interval);
        let interests = InterestMongoStore::new(&database, poll_interval);
        run(cli.command, books, interests, app_config.event())
    };

    if let Err(e) = &result {
        error!("명령 실행 중 에러가 발생 하였습니다. => {}", e);
    }
    result
}

fn run<R, I>(command: Command, books: R, interests: I, event: &Event) -> Result<(), Box<dyn Error>>
where
    R: BookRepository,
    I: InterestRepository
{
    let sweeping = matches!(command, Command::Watch | Command::Sweep);
    let mut board = Board::new(books, SystemClock)
        .approve_swapped_in(event.approve_swapped_in())
        .sweep_on_snapshot(sweeping);
    let subscription = board.subscribe()?;
    let report = board.on_feed(subscription.recv());

    match command {
        Command::Watch => watch(&mut board, subscription, event)?,
        Command::List { search, genre } => {
            board.set_search(&search);
            board.set_genre(&genre);
            print_json(&board.view().available)?;
        }
        Command::Pending => print_json(&board.view().pending)?,
        Command::Approve { id } => {
            let approval = board.approve(&id)?;
            print_json(&approval)?;
        }
        Command::Swap { id, genre, title } => {
            board.start_swap(&id)?;
            board.edit_swap(genre.as_deref(), Some(&title))?;
            let replacement = match board.confirm_swap() {
                Err(BoardError::Swap(SwapError::Partial(partial))) => {
                    warn!("교환 받은 도서 등록을 다시 시도 합니다. => {}", partial.cause());
                    board.retry_swap()?
                }
                result => result?,
            };
            print_json(&replacement)?;
        }
        Command::Register { file } => {
            let form = std::fs::read_to_string(&file)?;
            let form: Registration = serde_json::from_str(&form)?;
            let confirmation = registration::submit(board.store(), &form, &event.rules())?;
            print_json(&confirmation)?;
        }
        Command::Interest { book_id, name, email, code, slot, condition } => {
            let book = board.store().find_by_id(&book_id)?
                .ok_or_else(|| StoreError::NotFound(book_id.clone()))?;
            let desired = condition.as_deref().map(Condition::from_str).transpose()?;
            let requester = Owner::new(&name, &email, &code);
            let id = registration::register_interest(&interests, &book, &requester, desired, &slot, &event.rules())?;
            print_json(&id)?;
        }
        Command::Stats => {
            let subscription = interests.subscribe()?;
            match subscription.recv() {
                Feed::Snapshot(records) => print_json(&interest::aggregate(&records))?,
                Feed::Interrupted(reason) => return Err(StoreError::Query(reason).into()),
            }
        }
        Command::Seed => print_json(&board.seed_demo()?)?,
        Command::Sweep => print_json(&report.unwrap_or_default().deleted)?,
    }

    Ok(())
}

/// 구독이 끊어지면 마지막 화면을 유지한 채 다시 구독한다.
fn watch<R>(board: &mut Board<R, SystemClock>, mut subscription: Subscription<BookRecord>, event: &Event) -> Result<(), Box<dyn Error>>
where
    R: BookRepository
{
    let interval = event.sweep_interval();
    print_view(&board.view())?;

    loop {
        match subscription.recv_timeout(interval.unwrap_or(IDLE_REDRAW)) {
            Some(feed @ Feed::Snapshot(_)) => {
                board.on_feed(feed);
            }
            Some(feed @ Feed::Interrupted(_)) => {
                board.on_feed(feed);
                print_view(&board.view())?;
                thread::sleep(RESUBSCRIBE_DELAY);
                match board.subscribe() {
                    Ok(renewed) => {
                        info!("도서 구독을 다시 시작 했습니다.");
                        subscription = renewed;
                    }
                    Err(e) => error!("도서 구독에 실패 하였습니다. => {:?}", e),
                }
                continue;
            }
            None if interval.is_some() => {
                board.tick();
            }
            None => {}
        }
        print_view(&board.view())?;
    }
}

fn print_view(view: &BoardView) -> Result<(), serde_json::Error> {
    print_json(view)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
