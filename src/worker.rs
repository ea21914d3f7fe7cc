//! Scanner worker: dequeue a file, scan it, report its summary, close it.

use crate::options::ListFiles;
use crate::output;
use crate::scan::{grep_file, ScanContext};
use crate::session::Session;

/// Run one worker until the queue is drained. Returns true when none of
/// this worker's files produced output; the final exit status ANDs these.
pub fn worker_loop(sess: &Session) -> bool {
    let mut ctx = ScanContext::new(sess.opts.eol);
    let mut none_matched = true;

    while let Some(mut wf) = sess.queue.dequeue() {
        if sess.halted() {
            // Another worker settled the run; just close descriptors.
            continue;
        }

        ctx.filename = wf.path.clone();
        ctx.out_quiet = sess.opts.out_quiet;
        ctx.done_on_match = sess.opts.done_on_match;

        let count = match grep_file(&mut ctx, sess, &mut wf) {
            Ok(n) => n,
            Err(e) => {
                sess.report_fatal(&e);
                return none_matched;
            }
        };
        none_matched = count == 0 && none_matched;

        let summary = if sess.opts.count_matches {
            output::print_count_summary(sess, &wf.path, count)
        } else {
            Ok(())
        };
        let listing = match sess.opts.list_files {
            ListFiles::Matching if count > 0 => output::print_file_listing(sess, &wf.path),
            ListFiles::NonMatching if count == 0 => output::print_file_listing(sess, &wf.path),
            _ => Ok(()),
        };
        if let Err(e) = summary.and(listing) {
            sess.report_fatal(&e);
            return none_matched;
        }

        // Leave the descriptor positioned just past the last line that was
        // consumed, so whoever reads stdin next starts at a sane place.
        if wf.input.is_stdin() {
            let required = if ctx.outleft > 0 {
                ctx.buf.offset()
            } else {
                ctx.after_last_match
            };
            if required != ctx.buf.offset() && !wf.input.seek_to(required) && wf.is_regular {
                sess.suppressible_error(&wf.path, "lseek failed");
            }
        }
        // Dropping the work item closes its descriptor.
    }

    none_matched
}
