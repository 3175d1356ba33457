use std::io;

use anyhow::{Context, bail};
use chrono::NaiveDate;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::backend::Backend;
use crate::cli::{CategoryCommand, Command, ViewArgs};
use crate::config::Config;
use crate::datetime::{local_today, parse_due_date};
use crate::filter::{CategoryFilter, FilterState, paginate};
use crate::render::Renderer;
use crate::store::{AppState, NewTask, NoticeLevel};
use crate::task::{Priority, Profile, TaskPatch};

const DEFAULT_PAGE_SIZE: usize = 10;

/// Runs one command against `state`, then prints the notices it produced.
///
/// Error notices are dropped when the command itself fails, since the
/// returned error carries the same message.
pub async fn dispatch<B: Backend>(
    state: &mut AppState<B>,
    cfg: &Config,
    renderer: &Renderer,
    command: Command,
) -> anyhow::Result<()> {
    let today = local_today();
    debug!(%today, "dispatching command");

    let result = run_command(state, cfg, renderer, command, today).await;

    let notices: Vec<_> = state
        .take_notices()
        .into_iter()
        .filter(|n| result.is_ok() || n.level == NoticeLevel::Success)
        .collect();
    renderer.print_notices(&notices)?;

    result
}

async fn run_command<B: Backend>(
    state: &mut AppState<B>,
    cfg: &Config,
    renderer: &Renderer,
    command: Command,
    today: NaiveDate,
) -> anyhow::Result<()> {
    match command {
        Command::Register {
            email,
            password,
            first_name,
            last_name,
        } => {
            let password = read_password(password)?;
            let profile = Profile {
                first_name,
                last_name,
            };
            state.register(&email, &password, profile).await?;
            Ok(())
        }
        Command::Login { email, password } => {
            let password = read_password(password)?;
            state.sign_in(&email, &password).await?;
            Ok(())
        }
        Command::Logout => {
            state.restore_session().await?;
            if state.session().is_none() {
                println!("not signed in");
                return Ok(());
            }
            state.sign_out().await?;
            Ok(())
        }
        Command::Whoami => {
            state.restore_session().await?;
            renderer.print_session(state.session())
        }
        Command::Config => cmd_config(cfg),
        Command::Add {
            title,
            description,
            due,
            priority,
            category,
        } => {
            open_view(state, None).await?;
            let input = NewTask {
                title: title.join(" "),
                description,
                due_date: match due {
                    Some(expr) => parse_due_date(&expr, today)?,
                    None => None,
                },
                priority: match priority {
                    Some(p) => p.parse::<Priority>()?,
                    None => Priority::default(),
                },
                category_id: category
                    .map(|token| state.resolve_category(&token))
                    .transpose()?,
            };
            let task = state.create_task(input).await?;
            info!(id = %task.id, "task created");
            Ok(())
        }
        Command::List { view } => {
            open_view(state, Some(&view)).await?;
            cmd_list(state, cfg, renderer, view.page.unwrap_or(1), today)
        }
        Command::Show { task, view } => {
            open_view(state, Some(&view)).await?;
            let id = state.resolve_task(&task)?;
            let Some(task) = state.find_task(id) else {
                bail!("task {id} disappeared while loading");
            };
            renderer.print_task_info(task, state.categories(), today)
        }
        Command::Edit {
            task,
            title,
            description,
            due,
            set_priority,
            set_category,
            clear_description,
            clear_due,
            clear_category,
            view,
        } => {
            open_view(state, Some(&view)).await?;
            let id = state.resolve_task(&task)?;

            let mut patch = TaskPatch {
                title,
                ..TaskPatch::default()
            };
            if clear_description {
                patch.description = Some(None);
            } else if let Some(text) = description {
                patch.description = Some(Some(text).filter(|d| !d.trim().is_empty()));
            }
            if clear_due {
                patch.due_date = Some(None);
            } else if let Some(expr) = due {
                patch.due_date = Some(parse_due_date(&expr, today)?);
            }
            if let Some(p) = set_priority {
                patch.priority = Some(p.parse::<Priority>()?);
            }
            if clear_category {
                patch.category_id = Some(None);
            } else if let Some(token) = set_category {
                patch.category_id = Some(Some(state.resolve_category(&token)?));
            }

            state.update_task(id, patch).await?;
            Ok(())
        }
        Command::Done { task, view } => {
            let id = open_and_resolve(state, &view, &task).await?;
            state.set_completed(id, true).await?;
            Ok(())
        }
        Command::Undone { task, view } => {
            let id = open_and_resolve(state, &view, &task).await?;
            state.set_completed(id, false).await?;
            Ok(())
        }
        Command::Toggle { task, view } => {
            let id = open_and_resolve(state, &view, &task).await?;
            state.toggle_completed(id).await?;
            Ok(())
        }
        Command::Delete { task, view } => {
            let id = open_and_resolve(state, &view, &task).await?;
            state.delete_task(id).await?;
            Ok(())
        }
        Command::Move { from, to, view } => {
            open_view(state, Some(&view)).await?;
            cmd_move(state, from, to).await
        }
        Command::Category(CategoryCommand::Add { name }) => {
            open_view(state, None).await?;
            state.create_category(&name.join(" ")).await?;
            Ok(())
        }
        Command::Category(CategoryCommand::List) => {
            open_view(state, None).await?;
            renderer.print_categories(state.categories())
        }
    }
}

/// Restores the saved session, loads the owner's data and applies the
/// requested filters.
#[instrument(skip(state, view))]
async fn open_view<B: Backend>(
    state: &mut AppState<B>,
    view: Option<&ViewArgs>,
) -> anyhow::Result<()> {
    state.restore_session().await?;
    state.load().await?;
    if let Some(view) = view {
        let filters = filters_from_args(state, view)?;
        state.set_filters(filters);
    }
    Ok(())
}

async fn open_and_resolve<B: Backend>(
    state: &mut AppState<B>,
    view: &ViewArgs,
    token: &str,
) -> anyhow::Result<Uuid> {
    open_view(state, Some(view)).await?;
    Ok(state.resolve_task(token)?)
}

fn filters_from_args<B: Backend>(
    state: &AppState<B>,
    view: &ViewArgs,
) -> anyhow::Result<FilterState> {
    let mut filters = FilterState::default();
    if let Some(search) = &view.search {
        filters.search = search.clone();
    }
    if let Some(status) = &view.status {
        filters.status = status.parse()?;
    }
    if let Some(category) = &view.category {
        filters.category = if category.trim().eq_ignore_ascii_case("all") {
            CategoryFilter::All
        } else {
            CategoryFilter::Only(state.resolve_category(category)?)
        };
    }
    if let Some(priority) = &view.priority {
        filters.priority = priority.parse()?;
    }
    if let Some(sort) = &view.sort {
        filters.sort = sort.parse()?;
    }
    Ok(filters)
}

fn cmd_list<B: Backend>(
    state: &AppState<B>,
    cfg: &Config,
    renderer: &Renderer,
    page: usize,
    today: NaiveDate,
) -> anyhow::Result<()> {
    let page_size = cfg
        .get_usize("list.page_size")?
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .max(1);
    let visible = state.visible();
    let page = paginate(&visible, page, page_size);
    let first_row = (page.number - 1)
        .saturating_mul(page_size)
        .saturating_add(1);
    renderer.print_task_page(&page, first_row, state.categories(), today)
}

/// `from` and `to` are 1-based rows of the visible list.
async fn cmd_move<B: Backend>(
    state: &mut AppState<B>,
    from: usize,
    to: usize,
) -> anyhow::Result<()> {
    let (Some(from_idx), Some(to_idx)) = (from.checked_sub(1), to.checked_sub(1)) else {
        bail!("rows start at 1");
    };

    let outcome = state.reorder_visible(from_idx, to_idx).await?;
    debug!(
        attempted = outcome.attempted,
        succeeded = outcome.succeeded(),
        "reorder persisted"
    );
    if !outcome.is_success() {
        for (id, reason) in &outcome.failed {
            debug!(%id, %reason, "position write failed");
        }
        bail!(
            "new order only partially saved: {} of {} position updates failed",
            outcome.failed.len(),
            outcome.attempted
        );
    }
    Ok(())
}

fn cmd_config(cfg: &Config) -> anyhow::Result<()> {
    let mut entries: Vec<_> = cfg.iter().collect();
    entries.sort();
    for (k, v) in entries {
        println!("{k}={v}");
    }
    Ok(())
}

fn read_password(given: Option<String>) -> anyhow::Result<String> {
    if let Some(password) = given {
        return Ok(password);
    }
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
