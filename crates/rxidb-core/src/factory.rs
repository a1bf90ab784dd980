//! Opening and deleting databases

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::config::OpenConfig;
use crate::database::Database;
use crate::error::DbError;
use crate::provider::{Provider, UpgradeNeeded, VersionChange};
use crate::request::Request;
use crate::schema;
use crate::transaction::Transaction;

/// Open the database described by `config`.
///
/// The database is opened at the highest schema version (at least 1). If
/// that is above its current version, pending schema entries are applied in
/// ascending order inside the upgrade transaction, then the custom upgrade
/// hook runs. Any failure there aborts the upgrade and the open fails with
/// the abort reason.
pub fn open(config: OpenConfig) -> Request<Database> {
    Request::new(move |responder| {
        let OpenConfig {
            name,
            provider,
            schema: versions,
            mut on_upgrade,
            mut on_blocked,
            auto_close_on_version_change,
        } = config;

        schema::validate(&versions)?;
        let version = schema::target_version(&versions);
        debug!(db = %name, version, "opening database");
        let request = provider.open(&name, version)?;

        // The upgrade handler and the success handler share one façade
        // connection so listeners added during the upgrade survive.
        let slot: Rc<RefCell<Option<Database>>> = Rc::new(RefCell::new(None));
        // Reason a schema step or hook gave for aborting the upgrade.
        let reason: Rc<RefCell<Option<DbError>>> = Rc::new(RefCell::new(None));

        let upgrade_slot = slot.clone();
        let upgrade_reason = reason.clone();
        let upgrade_provider = provider.clone();
        request.set_on_upgrade_needed(Box::new(move |event: UpgradeNeeded| {
            let UpgradeNeeded {
                database,
                transaction,
                old_version,
                new_version,
            } = event;
            debug!(old = old_version, new = new_version, "upgrade needed");

            let db = Database::wrap(database.clone(), upgrade_provider.clone());
            *upgrade_slot.borrow_mut() = Some(db.clone());
            let tx = Transaction::wrap(transaction.clone(), db.clone());

            let result = schema::apply(&versions, old_version, &*database, &*transaction).and_then(
                |()| match on_upgrade.as_mut() {
                    Some(hook) => hook(&db, old_version, new_version, &tx),
                    None => Ok(()),
                },
            );
            if let Err(err) = result {
                warn!(error = %err, "upgrade failed, aborting");
                *upgrade_reason.borrow_mut() = Some(err);
                if let Err(abort_err) = tx.abort() {
                    warn!(error = %abort_err, "could not abort the upgrade");
                }
            }
        }));

        let blocked_name = name.clone();
        request.set_on_blocked(Box::new(move |change: VersionChange| match on_blocked.as_mut() {
            Some(hook) => hook(&change),
            None => warn!(
                db = %blocked_name,
                old = change.old_version,
                new = ?change.new_version,
                "open blocked by other connections"
            ),
        }));

        let on_error = responder.clone();
        let success_provider = provider;
        request.set_callbacks(
            Box::new(move |raw| {
                let upgraded = slot.borrow_mut().take();
                let db = upgraded.unwrap_or_else(|| Database::wrap(raw, success_provider.clone()));
                if auto_close_on_version_change {
                    db.set_auto_close_on_version_change(true);
                }
                debug!(db = %db.name(), version = db.version(), "database open");
                responder.success(db);
            }),
            Box::new(move |err| {
                let err = reason.borrow_mut().take().unwrap_or(err);
                on_error.failure(err)
            }),
        );
        Ok(())
    })
}

/// Delete the database `name`.
///
/// Waits while other connections stay open after being notified; the wait
/// is logged at `warn`.
pub fn delete_database(provider: Rc<dyn Provider>, name: &str) -> Request<()> {
    let name = name.to_string();
    Request::new(move |responder| {
        debug!(db = %name, "deleting database");
        let request = provider.delete_database(&name)?;

        let blocked_name = name.clone();
        request.set_on_blocked(Box::new(move |_| {
            warn!(db = %blocked_name, "database deletion blocked by open connections");
        }));

        let on_error = responder.clone();
        request.set_callbacks(
            Box::new(move |()| responder.success(())),
            Box::new(move |err: DbError| on_error.failure(err)),
        );
        Ok(())
    })
}
