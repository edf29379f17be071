pub mod viewport_watcher;
