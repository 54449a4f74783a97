use super::Widget;
use crate::dashboard::dashboard::RootHandle;
use crate::dashboard::process::CommandLine;
use crate::dashboard::data_cache::{
    CacheDir, DownloadBatch, DownloadEvent, DownloadPolicy, Fetcher, HttpFetcher, JsonCache,
};
use crate::dashboard::timer::{ScheduledTimer, VisibilitySignal};
use crate::dashboard::worker::{BackgroundWorker, RunPolicy, UiWaker};
use anyhow::{Context, Result};
use eframe::egui;
use regex::Regex;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Upper bound on items kept from one fetch.
pub const MAX_ITEMS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub feed: String,
    pub folder: String,
    /// Publication time as a unix timestamp.
    pub pub_date: i64,
    #[serde(default)]
    pub favicon: Option<String>,
}

/// Where news items come from.
pub trait NewsSource: Send + Sync {
    fn fetch(&self) -> Result<Vec<NewsItem>>;

    fn mark_read(&self, id: i64) -> Result<()>;
}

#[derive(Deserialize)]
struct FolderList {
    folders: Vec<ApiFolder>,
}

#[derive(Deserialize)]
struct ApiFolder {
    id: i64,
    name: String,
}

#[derive(Deserialize)]
struct FeedList {
    feeds: Vec<ApiFeed>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiFeed {
    id: i64,
    title: String,
    #[serde(default)]
    folder_id: Option<i64>,
    #[serde(default)]
    favicon_link: Option<String>,
}

#[derive(Deserialize)]
struct ItemList {
    items: Vec<ApiItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiItem {
    id: i64,
    feed_id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    pub_date: i64,
}

/// Unread items of a Nextcloud News account.
pub struct NextcloudNews {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl NextcloudNews {
    pub fn new(server: &str, username: &str, password: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("deskboard news")
            .build()?;
        Ok(Self {
            client,
            base_url: format!(
                "{}/index.php/apps/news/api/v1-2",
                server.trim_end_matches('/')
            ),
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    fn get<T: serde::de::DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}/{path}", self.base_url);
        self.client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .query(query)
            .send()
            .with_context(|| format!("GET {url}"))?
            .error_for_status()?
            .json::<T>()
            .with_context(|| format!("decoding {path}"))
    }
}

impl NewsSource for NextcloudNews {
    fn fetch(&self) -> Result<Vec<NewsItem>> {
        let folders: HashMap<i64, String> = self
            .get::<FolderList>("folders", &[])?
            .folders
            .into_iter()
            .map(|f| (f.id, f.name))
            .collect();
        let feeds: HashMap<i64, ApiFeed> = self
            .get::<FeedList>("feeds", &[])?
            .feeds
            .into_iter()
            .map(|f| (f.id, f))
            .collect();
        let items = self.get::<ItemList>(
            "items",
            &[("type", "3"), ("getRead", "false"), ("batchSize", "-1")],
        )?;
        let mut out = Vec::new();
        for item in items.items.into_iter().take(MAX_ITEMS) {
            let Some(feed) = feeds.get(&item.feed_id) else {
                tracing::debug!(id = item.id, feed = item.feed_id, "item of unknown feed");
                continue;
            };
            let folder = feed
                .folder_id
                .and_then(|id| folders.get(&id).cloned())
                .unwrap_or_else(|| "No folder".to_string());
            out.push(NewsItem {
                id: item.id,
                title: item.title.unwrap_or_default(),
                url: item.url.unwrap_or_default(),
                feed: feed.title.clone(),
                folder,
                pub_date: item.pub_date,
                favicon: feed.favicon_link.clone(),
            });
        }
        Ok(out)
    }

    fn mark_read(&self, id: i64) -> Result<()> {
        let url = format!("{}/items/{id}/read", self.base_url);
        self.client
            .put(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .with_context(|| format!("PUT {url}"))?
            .error_for_status()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemScope {
    Folder,
    Feed,
    Entry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemAction {
    Exclude,
    Collapse,
}

/// Display rule matching a folder, feed or entry title.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ItemOption {
    #[serde(rename = "type")]
    pub scope: ItemScope,
    pub action: ItemAction,
    #[serde(default)]
    pub value: Option<String>,
    /// Anchored at the start of the name.
    #[serde(default)]
    pub regex: Option<String>,
}

enum Matcher {
    Exact(String),
    Pattern(Regex),
}

struct ItemRule {
    scope: ItemScope,
    action: ItemAction,
    matcher: Matcher,
}

impl ItemRule {
    fn compile(option: &ItemOption) -> Result<Self> {
        let matcher = match (&option.value, &option.regex) {
            (Some(value), _) => Matcher::Exact(value.clone()),
            (None, Some(re)) => Matcher::Pattern(
                Regex::new(&format!("^(?:{re})")).with_context(|| format!("invalid regex '{re}'"))?,
            ),
            (None, None) => anyhow::bail!("item option needs either 'value' or 'regex'"),
        };
        Ok(Self {
            scope: option.scope,
            action: option.action,
            matcher,
        })
    }

    fn matches(&self, scope: ItemScope, name: &str, action: ItemAction) -> bool {
        self.scope == scope
            && self.action == action
            && match &self.matcher {
                Matcher::Exact(value) => value == name,
                Matcher::Pattern(re) => re.is_match(name),
            }
    }
}

fn check(rules: &[ItemRule], scope: ItemScope, name: &str, action: ItemAction) -> bool {
    rules.iter().any(|r| r.matches(scope, name, action))
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedGroup {
    pub name: String,
    pub collapsed: bool,
    pub favicon: Option<String>,
    pub items: Vec<NewsItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MenuEntryKind {
    Action,
    Separator,
}

fn default_menu_entry_kind() -> MenuEntryKind {
    MenuEntryKind::Action
}

/// Extra entry of the item context menu.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextMenuItem {
    #[serde(rename = "type", default = "default_menu_entry_kind")]
    pub kind: MenuEntryKind,
    #[serde(default)]
    pub title: String,
    /// Run for the item with `{id}`, `{title}`, `{url}`, `{feed}` and `{folder}` filled in.
    #[serde(default)]
    pub command: Option<String>,
    /// Mark the item read once the command succeeded.
    #[serde(default)]
    pub mark_as_read: bool,
}

struct MenuEntry {
    kind: MenuEntryKind,
    title: String,
    command: Option<CommandLine>,
    mark_as_read: bool,
}

impl MenuEntry {
    fn compile(item: &ContextMenuItem) -> Result<Self> {
        if item.kind == MenuEntryKind::Action && item.title.is_empty() {
            anyhow::bail!("context menu item needs a title");
        }
        Ok(Self {
            kind: item.kind,
            title: item.title.clone(),
            command: item.command.as_deref().map(CommandLine::parse).transpose()?,
            mark_as_read: item.mark_as_read,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FolderGroup {
    pub name: String,
    pub collapsed: bool,
    pub count: usize,
    pub feeds: Vec<FeedGroup>,
}

/// Group by folder then feed, both sorted case-insensitively, dropping
/// anything excluded by `rules`.
fn group_items(items: &[NewsItem], rules: &[ItemRule]) -> Vec<FolderGroup> {
    let mut grouped: BTreeMap<(String, String), BTreeMap<(String, String), Vec<NewsItem>>> =
        BTreeMap::new();
    for item in items {
        grouped
            .entry((item.folder.to_lowercase(), item.folder.clone()))
            .or_default()
            .entry((item.feed.to_lowercase(), item.feed.clone()))
            .or_default()
            .push(item.clone());
    }
    let mut out = Vec::new();
    for ((_, folder), feeds) in grouped {
        if check(rules, ItemScope::Folder, &folder, ItemAction::Exclude) {
            continue;
        }
        let count = feeds.values().map(Vec::len).sum();
        let feeds = feeds
            .into_iter()
            .filter(|((_, feed), _)| !check(rules, ItemScope::Feed, feed, ItemAction::Exclude))
            .map(|((_, feed), entries)| FeedGroup {
                collapsed: check(rules, ItemScope::Feed, &feed, ItemAction::Collapse),
                favicon: entries.iter().find_map(|e| e.favicon.clone()),
                items: entries
                    .into_iter()
                    .filter(|e| !check(rules, ItemScope::Entry, &e.title, ItemAction::Exclude))
                    .collect(),
                name: feed,
            })
            .collect();
        out.push(FolderGroup {
            collapsed: check(rules, ItemScope::Folder, &folder, ItemAction::Collapse),
            name: folder,
            count,
            feeds,
        });
    }
    out
}

fn default_update_interval() -> u64 {
    600
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewsConfig {
    pub nextcloud_url: String,
    pub username: String,
    pub password: String,
    /// Seconds between refreshes.
    #[serde(default = "default_update_interval")]
    pub update_interval: u64,
    /// Keep refreshing while hidden.
    #[serde(default)]
    pub update_in_background: bool,
    /// Tab that shows the number of unseen items.
    #[serde(default)]
    pub tab_id_status: Option<String>,
    #[serde(default)]
    pub item_options: Vec<ItemOption>,
    #[serde(default)]
    pub context_menu_items: Vec<ContextMenuItem>,
}

/// Unread news grouped by folder and feed.
pub struct NewsWidget {
    root: RootHandle,
    tab_id_status: Option<String>,
    rules: Vec<ItemRule>,
    menu: Vec<MenuEntry>,
    menu_done: (Sender<i64>, Receiver<i64>),
    visibility: VisibilitySignal,
    timer: ScheduledTimer,
    background: bool,
    fetch: BackgroundWorker<Vec<NewsItem>>,
    refresh: BackgroundWorker<Vec<NewsItem>>,
    store: JsonCache<Vec<NewsItem>>,
    save: BackgroundWorker<()>,
    snapshot: Arc<Mutex<Option<Vec<NewsItem>>>>,
    mark: BackgroundWorker<usize>,
    to_mark: Arc<Mutex<Vec<i64>>>,
    icons: CacheDir,
    favicons: HashMap<String, PathBuf>,
    downloads: Option<DownloadBatch>,
    fetcher: Arc<dyn Fetcher>,
    waker: UiWaker,
    items: Vec<NewsItem>,
    groups: Vec<FolderGroup>,
    seen: HashSet<i64>,
    was_visible: bool,
    last_update: Option<chrono::DateTime<chrono::Local>>,
}

impl NewsWidget {
    pub fn new(cfg: NewsConfig, root: RootHandle) -> Result<Self> {
        let source = NextcloudNews::new(&cfg.nextcloud_url, &cfg.username, &cfg.password)?;
        let fetcher = HttpFetcher::new()?;
        Self::with_source(cfg, root, Arc::new(source), Arc::new(fetcher))
    }

    pub fn with_source(
        cfg: NewsConfig,
        root: RootHandle,
        source: Arc<dyn NewsSource>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        let rules = cfg
            .item_options
            .iter()
            .map(ItemRule::compile)
            .collect::<Result<Vec<_>>>()?;
        let menu = cfg
            .context_menu_items
            .iter()
            .map(MenuEntry::compile)
            .collect::<Result<Vec<_>>>()?;
        let inner = root.get()?;
        let waker = inner.waker();
        let dir = inner.cache_dir("news");
        let store: JsonCache<Vec<NewsItem>> = JsonCache::new(dir.file(&cfg.nextcloud_url, "json"));

        let visibility = VisibilitySignal::new();
        let interval = Duration::from_secs(cfg.update_interval.max(1));
        let timer = if cfg.update_in_background {
            ScheduledTimer::unbound(interval)
        } else {
            ScheduledTimer::bound(interval, &visibility)
        };

        let job = {
            let source = Arc::clone(&source);
            move || source.fetch()
        };
        let fetch = BackgroundWorker::new("news-fetch", RunPolicy::Coalesce, waker.clone(), job.clone());
        let refresh = BackgroundWorker::new("news-refresh", RunPolicy::Race, waker.clone(), job);

        let snapshot: Arc<Mutex<Option<Vec<NewsItem>>>> = Arc::new(Mutex::new(None));
        let save = {
            let snapshot = Arc::clone(&snapshot);
            let store = store.clone();
            BackgroundWorker::new("news-save", RunPolicy::Queue, waker.clone(), move || {
                let items = snapshot.lock().map_err(|_| anyhow::anyhow!("snapshot lock poisoned"))?.take();
                if let Some(items) = items {
                    store.save(&items)?;
                }
                Ok(())
            })
        };

        let to_mark: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
        let mark = {
            let to_mark = Arc::clone(&to_mark);
            let source = Arc::clone(&source);
            BackgroundWorker::new("news-mark-read", RunPolicy::Queue, waker.clone(), move || {
                let ids: Vec<i64> = std::mem::take(
                    &mut *to_mark.lock().map_err(|_| anyhow::anyhow!("mark lock poisoned"))?,
                );
                let mut failed = Vec::new();
                for id in &ids {
                    if let Err(e) = source.mark_read(*id) {
                        tracing::warn!(id, error = %e, "marking item read failed");
                        failed.push(*id);
                    }
                }
                let marked = ids.len() - failed.len();
                if !failed.is_empty() {
                    let count = failed.len();
                    to_mark
                        .lock()
                        .map_err(|_| anyhow::anyhow!("mark lock poisoned"))?
                        .extend(failed);
                    if marked == 0 {
                        anyhow::bail!("{count} items could not be marked read");
                    }
                }
                Ok(marked)
            })
        };

        let mut widget = Self {
            root,
            tab_id_status: cfg.tab_id_status,
            rules,
            menu,
            menu_done: channel(),
            visibility,
            timer,
            background: cfg.update_in_background,
            fetch,
            refresh,
            store,
            save,
            snapshot,
            mark,
            to_mark,
            icons: dir.subdir("favicons"),
            favicons: HashMap::new(),
            downloads: None,
            fetcher,
            waker,
            items: Vec::new(),
            groups: Vec::new(),
            seen: HashSet::new(),
            was_visible: false,
            last_update: None,
        };
        if let Some(cached) = widget.store.load() {
            tracing::debug!(items = cached.len(), "loaded cached news");
            widget.seen = cached.iter().map(|i| i.id).collect();
            widget.set_items(cached);
        }
        Ok(widget)
    }

    pub fn items(&self) -> &[NewsItem] {
        &self.items
    }

    pub fn groups(&self) -> &[FolderGroup] {
        &self.groups
    }

    pub fn unseen_count(&self) -> usize {
        self.items.iter().filter(|i| !self.seen.contains(&i.id)).count()
    }

    /// Fetch now, ignoring the schedule. The newest completed fetch wins.
    pub fn refresh_now(&mut self) {
        self.refresh.start();
    }

    /// Queue `id` to be marked read on the server.
    pub fn mark_read(&mut self, id: i64) {
        self.queue_mark_read(id);
    }

    /// Ids whose mark-read request failed and waits for a retry.
    pub fn pending_marks(&self) -> Vec<i64> {
        self.to_mark.lock().map(|ids| ids.clone()).unwrap_or_default()
    }

    /// Send the pending mark-read requests again.
    pub fn retry_marks(&mut self) {
        if !self.pending_marks().is_empty() {
            self.mark.start();
        }
    }

    /// Block until queued mark-read runs finish. Returns how many items were marked.
    pub fn wait_for_marks(&mut self, timeout: Duration) -> usize {
        self.mark.wait_idle(timeout).into_iter().sum()
    }

    /// Run the configured context menu entry `index` for `item`.
    ///
    /// The command runs in the background. When the entry marks items read,
    /// the item is queued once the command exits successfully.
    pub fn run_menu_entry(&mut self, index: usize, item: &NewsItem) -> Result<()> {
        let entry = self
            .menu
            .get(index)
            .with_context(|| format!("no context menu entry {index}"))?;
        let Some(command) = &entry.command else {
            if entry.mark_as_read {
                self.queue_mark_read(item.id);
            }
            return Ok(());
        };
        let id = item.id.to_string();
        let vars = [
            ("id", id.as_str()),
            ("title", item.title.as_str()),
            ("url", item.url.as_str()),
            ("feed", item.feed.as_str()),
            ("folder", item.folder.as_str()),
        ];
        let mut child = command.spawn(&vars)?;
        let program = command.program().to_string();
        let done = entry.mark_as_read.then(|| self.menu_done.0.clone());
        let waker = self.waker.clone();
        let item_id = item.id;
        std::thread::Builder::new()
            .name("worker-news-menu".into())
            .spawn(move || match child.wait() {
                Ok(status) if status.success() => {
                    if let Some(done) = done {
                        if done.send(item_id).is_ok() {
                            waker.wake();
                        }
                    }
                }
                Ok(status) => tracing::warn!(%program, %status, "context menu command failed"),
                Err(e) => tracing::warn!(%program, error = %e, "context menu command did not finish"),
            })?;
        Ok(())
    }

    /// Block until outstanding fetches finish and apply the newest result.
    pub fn wait_for_fetch(&mut self, timeout: Duration) {
        let mut results = self.fetch.wait_idle(timeout);
        results.extend(self.refresh.wait_idle(timeout));
        if let Some(items) = results.pop() {
            self.apply_items(items);
        }
    }

    fn set_items(&mut self, items: Vec<NewsItem>) {
        self.groups = group_items(&items, &self.rules);
        self.items = items;
        self.request_favicons();
    }

    fn apply_items(&mut self, items: Vec<NewsItem>) {
        tracing::debug!(items = items.len(), "news updated");
        self.set_items(items);
        self.last_update = Some(chrono::Local::now());
        if self.visibility.is_visible() {
            self.mark_all_seen();
        }
        self.update_tab();
        match self.snapshot.lock() {
            Ok(mut slot) => *slot = Some(self.items.clone()),
            Err(_) => tracing::warn!("news snapshot lock poisoned"),
        }
        self.save.start();
    }

    fn mark_all_seen(&mut self) {
        self.seen = self.items.iter().map(|i| i.id).collect();
    }

    fn update_tab(&self) {
        let Some(id) = &self.tab_id_status else {
            return;
        };
        let (strip, index) = self.root.tab_by_id(id);
        let Some(strip) = strip else {
            tracing::debug!(tab_id = %id, "status tab not found");
            return;
        };
        let unseen = self.unseen_count();
        if unseen > 0 {
            strip.append_suffix(index, Some(&format!("({unseen})")));
            strip.set_highlight(index, true);
        } else {
            strip.append_suffix(index, None);
            strip.set_highlight(index, false);
        }
    }

    fn request_favicons(&mut self) {
        if self.downloads.is_some() {
            return;
        }
        let mut wanted: Vec<(String, String)> = Vec::new();
        for item in &self.items {
            let Some(url) = &item.favicon else { continue };
            if self.favicons.contains_key(&item.feed) || wanted.iter().any(|(k, _)| k == &item.feed) {
                continue;
            }
            wanted.push((item.feed.clone(), url.clone()));
        }
        if wanted.is_empty() {
            return;
        }
        self.downloads = Some(DownloadBatch::spawn(
            self.icons.clone(),
            wanted,
            DownloadPolicy::default(),
            Arc::clone(&self.fetcher),
            self.waker.clone(),
        ));
    }

    fn drain_downloads(&mut self) {
        let Some(batch) = self.downloads.as_mut() else {
            return;
        };
        for event in batch.drain() {
            match event {
                DownloadEvent::FileDone { key, path, .. } => {
                    self.favicons.insert(key, path);
                }
                DownloadEvent::Failed { key, error } => {
                    tracing::debug!(feed = %key, %error, "favicon download failed");
                }
                DownloadEvent::AllDone { .. } => {}
            }
        }
        if batch.is_finished() {
            self.downloads = None;
        }
    }

    fn open_item(&mut self, item: &NewsItem) {
        if let Err(e) = open::that(&item.url) {
            tracing::warn!(url = %item.url, error = %e, "failed to open news item");
        }
        self.queue_mark_read(item.id);
    }

    fn queue_mark_read(&mut self, id: i64) {
        match self.to_mark.lock() {
            Ok(mut ids) => ids.push(id),
            Err(_) => {
                tracing::warn!("mark queue lock poisoned");
                return;
            }
        }
        self.mark.start();
    }

    fn item_row(&self, ui: &mut egui::Ui, item: &NewsItem, actions: &mut Vec<RowAction>) {
        ui.horizontal(|ui| {
            let resp = ui.link(&item.title).on_hover_text(&item.title);
            if resp.clicked() {
                actions.push(RowAction::Open(item.clone()));
            }
            resp.clone().context_menu(|ui| {
                if ui.button("Open").clicked() {
                    actions.push(RowAction::Open(item.clone()));
                    ui.close_menu();
                }
                if ui.button("Copy URL").clicked() {
                    ui.output_mut(|o| o.copied_text = item.url.clone());
                    ui.close_menu();
                }
                ui.separator();
                if ui.button("Mark as read").clicked() {
                    actions.push(RowAction::MarkRead(item.id));
                    ui.close_menu();
                }
                if !self.menu.is_empty() {
                    ui.separator();
                }
                for (index, entry) in self.menu.iter().enumerate() {
                    match entry.kind {
                        MenuEntryKind::Separator => {
                            ui.separator();
                        }
                        MenuEntryKind::Action => {
                            if ui.button(&entry.title).clicked() {
                                actions.push(RowAction::Menu(index, item.clone()));
                                ui.close_menu();
                            }
                        }
                    }
                }
            });
            if let Some(date) = chrono::DateTime::from_timestamp(item.pub_date, 0) {
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    ui.weak(date.with_timezone(&chrono::Local).format("%c").to_string());
                });
            }
        });
    }
}

enum RowAction {
    Open(NewsItem),
    MarkRead(i64),
    Menu(usize, NewsItem),
}

impl Widget for NewsWidget {
    fn render(&mut self, ui: &mut egui::Ui) {
        let mut actions = Vec::new();
        ui.horizontal(|ui| {
            if ui.button("Refresh").clicked() {
                self.refresh_now();
            }
            if self.fetch.is_running() || self.refresh.is_running() {
                ui.spinner();
            }
            if let Some(at) = self.last_update {
                ui.weak(format!("Updated {}", at.format("%H:%M")));
            }
        });
        egui::ScrollArea::vertical()
            .auto_shrink([false, false])
            .show(ui, |ui| {
                for folder in &self.groups {
                    egui::CollapsingHeader::new(format!("{} ({})", folder.name, folder.count))
                        .id_source(("news_folder", &folder.name))
                        .default_open(!folder.collapsed)
                        .show(ui, |ui| {
                            for feed in &folder.feeds {
                                let icon = self.favicons.get(&feed.name);
                                ui.horizontal(|ui| {
                                    if let Some(path) = icon {
                                        ui.add(
                                            egui::Image::new(format!("file://{}", path.display()))
                                                .fit_to_exact_size(egui::vec2(16.0, 16.0)),
                                        );
                                    }
                                    egui::CollapsingHeader::new(format!(
                                        "{} ({})",
                                        feed.name,
                                        feed.items.len()
                                    ))
                                    .id_source(("news_feed", &folder.name, &feed.name))
                                    .default_open(!feed.collapsed)
                                    .show(ui, |ui| {
                                        for item in &feed.items {
                                            self.item_row(ui, item, &mut actions);
                                        }
                                    });
                                });
                            }
                        });
                }
            });
        for action in actions {
            match action {
                RowAction::Open(item) => self.open_item(&item),
                RowAction::MarkRead(id) => self.queue_mark_read(id),
                RowAction::Menu(index, item) => {
                    if let Err(e) = self.run_menu_entry(index, &item) {
                        tracing::warn!(error = %e, "context menu entry failed");
                    }
                }
            }
        }
    }

    fn tick(&mut self, now: Instant) {
        let visible = self.visibility.is_visible();
        if visible && !self.was_visible {
            self.mark_all_seen();
            self.update_tab();
        }
        self.was_visible = visible;

        if self.timer.poll_at(now) {
            self.retry_marks();
            self.fetch.start();
        }
        let finished: Vec<i64> = self.menu_done.1.try_iter().collect();
        for id in finished {
            self.queue_mark_read(id);
        }
        let mut results = self.fetch.drain();
        results.extend(self.refresh.drain());
        if let Some(items) = results.pop() {
            self.apply_items(items);
        }
        self.save.drain();
        if self.mark.drain().iter().any(|n| *n > 0) {
            self.fetch.start();
        }
        self.drain_downloads();
    }

    fn visibility(&self) -> Option<&VisibilitySignal> {
        Some(&self.visibility)
    }

    fn start(&mut self) {
        if self.background {
            self.timer.start();
        }
        self.update_tab();
    }

    fn stop(&mut self) {
        self.timer.stop();
        if let Some(batch) = &self.downloads {
            batch.stop();
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timer.next_due()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, folder: &str, feed: &str, title: &str) -> NewsItem {
        NewsItem {
            id,
            title: title.into(),
            url: format!("https://news.example/{id}"),
            feed: feed.into(),
            folder: folder.into(),
            pub_date: 1_700_000_000,
            favicon: None,
        }
    }

    fn rule(scope: ItemScope, action: ItemAction, value: Option<&str>, regex: Option<&str>) -> ItemRule {
        ItemRule::compile(&ItemOption {
            scope,
            action,
            value: value.map(str::to_string),
            regex: regex.map(str::to_string),
        })
        .unwrap()
    }

    #[test]
    fn groups_sort_case_insensitively() {
        let items = vec![
            item(1, "tech", "b-feed", "one"),
            item(2, "Arts", "z", "two"),
            item(3, "tech", "A-feed", "three"),
        ];
        let groups = group_items(&items, &[]);
        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, ["Arts", "tech"]);
        let feeds: Vec<&str> = groups[1].feeds.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(feeds, ["A-feed", "b-feed"]);
        assert_eq!(groups[1].count, 2);
    }

    #[test]
    fn rules_exclude_and_collapse() {
        let items = vec![
            item(1, "tech", "spam", "x"),
            item(2, "tech", "good", "Sponsored: buy"),
            item(3, "tech", "good", "real"),
            item(4, "hidden", "f", "y"),
        ];
        let rules = vec![
            rule(ItemScope::Folder, ItemAction::Exclude, Some("hidden"), None),
            rule(ItemScope::Feed, ItemAction::Exclude, Some("spam"), None),
            rule(ItemScope::Entry, ItemAction::Exclude, None, Some("Sponsored")),
            rule(ItemScope::Folder, ItemAction::Collapse, Some("tech"), None),
        ];
        let groups = group_items(&items, &rules);
        assert_eq!(groups.len(), 1);
        assert!(groups[0].collapsed);
        assert_eq!(groups[0].feeds.len(), 1);
        let titles: Vec<&str> = groups[0].feeds[0].items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, ["real"]);
    }

    #[test]
    fn option_without_matcher_is_rejected() {
        let option = ItemOption {
            scope: ItemScope::Feed,
            action: ItemAction::Exclude,
            value: None,
            regex: None,
        };
        assert!(ItemRule::compile(&option).is_err());
        let bad = ItemOption {
            regex: Some("(".into()),
            ..option
        };
        assert!(ItemRule::compile(&bad).is_err());
    }

    #[test]
    fn context_menu_items_parse_and_validate() {
        let items: Vec<ContextMenuItem> = serde_json::from_value(serde_json::json!([
            {"title": "Save for later", "command": "pocket add {url}", "mark_as_read": true},
            {"type": "separator"},
        ]))
        .unwrap();
        let entries: Vec<MenuEntry> = items.iter().map(|i| MenuEntry::compile(i).unwrap()).collect();
        assert_eq!(entries[0].kind, MenuEntryKind::Action);
        assert!(entries[0].mark_as_read);
        assert_eq!(
            entries[0].command.as_ref().unwrap().render(&[("url", "https://x/1")]).unwrap(),
            ["pocket", "add", "https://x/1"]
        );
        assert_eq!(entries[1].kind, MenuEntryKind::Separator);

        let untitled: ContextMenuItem = serde_json::from_value(serde_json::json!({"command": "true"})).unwrap();
        assert!(MenuEntry::compile(&untitled).is_err());
        let unbalanced: ContextMenuItem =
            serde_json::from_value(serde_json::json!({"title": "x", "command": "echo 'oops"})).unwrap();
        assert!(MenuEntry::compile(&unbalanced).is_err());
    }
}
