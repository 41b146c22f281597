//! Plain-text rendering of a [`LeakReport`].

use std::io::{self, Write};

use leakprof::{
    LeakReport, ObjectDescription, ReferenceContext, ReferenceRecord, SampleRecord,
    SessionSummary,
};

fn type_name(description: Option<&ObjectDescription>) -> &str {
    description.map_or("<unknown>", |d| d.type_name.as_str())
}

fn slot(record: &ReferenceRecord) -> String {
    match &record.context {
        ReferenceContext::Root(root) => {
            let mut line = format!("root [{}, {}]", root.system.name(), root.kind.name());
            if let Some(description) = &root.description {
                line.push_str(&format!(" {description}"));
            }
            line
        }
        ReferenceContext::Field { index, name, .. } => match name {
            Some(name) => format!("field {name}"),
            None => format!("field #{index}"),
        },
        ReferenceContext::Element { index, length, .. } => match length {
            Some(length) => format!("element [{index}] of {length}"),
            None => format!("element [{index}]"),
        },
        ReferenceContext::Sample => "no path to a gc root".to_string(),
    }
}

fn write_sample(
    out: &mut impl Write,
    report: &LeakReport,
    sample: &SampleRecord,
) -> io::Result<()> {
    let description = sample.description.as_ref();
    write!(
        out,
        "{} at {} ({} bytes, span {} bytes, age {:?}, thread {}",
        type_name(description),
        sample.object,
        sample.allocated,
        sample.span,
        sample.age,
        sample.thread.0
    )?;
    if let Some(trace) = sample.stack_trace {
        write!(out, ", site {}", trace.0)?;
    }
    writeln!(out, ")")?;

    for record in report.chain(sample) {
        writeln!(
            out,
            "    {} {}  <- {}",
            type_name(record.description.as_ref()),
            record.pointee,
            slot(record)
        )?;
        if record.skip > 0 {
            writeln!(out, "    ... {} more ...", record.skip)?;
        }
    }
    Ok(())
}

/// Writes the session summary and up to `limit` samples, largest span first.
pub fn write(
    out: &mut impl Write,
    summary: &SessionSummary,
    report: &LeakReport,
    limit: usize,
) -> io::Result<()> {
    let stats = &summary.stats;
    writeln!(
        out,
        "{} old samples, {} with a path to a gc root, {} stored edges ({:?})",
        summary.samples, summary.chains, summary.edges, summary.elapsed
    )?;
    writeln!(
        out,
        "searched {} roots, {} objects visited",
        stats.roots, stats.objects_visited
    )?;
    if stats.timed_out || stats.aborted {
        writeln!(
            out,
            "search incomplete (timed out: {}, aborted: {})",
            stats.timed_out, stats.aborted
        )?;
    }
    if stats.max_depth_reached + stats.probe_stack_full + stats.edge_queue_full > 0 {
        writeln!(
            out,
            "limits hit: depth {}, probe stack {}, edge queue {} ({} fallbacks)",
            stats.max_depth_reached,
            stats.probe_stack_full,
            stats.edge_queue_full,
            stats.dfs_fallbacks
        )?;
    }

    let mut samples: Vec<&SampleRecord> = report.samples.iter().collect();
    samples.sort_by(|a, b| b.span.cmp(&a.span));
    for sample in samples.into_iter().take(limit) {
        writeln!(out)?;
        write_sample(out, report, sample)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use leakprof::{
        LeakSettings, ObjectSampler, ReportCollector, RootKind, RootSystem, SamplingSession,
    };
    use object::{AllocSite, Class, ObjectSpace, SpaceSettings};

    use super::*;

    #[test]
    fn skipped_hops_are_rendered() {
        let space = ObjectSpace::new(SpaceSettings::default()).unwrap();
        let node = space.define_class(Class::new("Holder", &["next"]));
        let head = space.alloc_instance(node, AllocSite::thread(0)).unwrap();
        space.add_root(
            RootSystem::Globals,
            RootKind::GlobalHandle,
            "static HEAD",
            Some(head),
        );
        let mut tail = head;
        for _ in 0..20 {
            let next = space.alloc_instance(node, AllocSite::thread(0)).unwrap();
            space.set_field(tail, 0, Some(next)).unwrap();
            tail = next;
        }
        let sampler = Arc::new(ObjectSampler::new(8, space.weak_references()));
        space.attach_sampler(sampler.clone());
        let leaked = space.alloc_str("leaked", AllocSite::thread(0).at(9)).unwrap();
        space.set_field(tail, 0, Some(leaked)).unwrap();
        thread::sleep(Duration::from_millis(2));
        space.collect();

        let settings = LeakSettings {
            leak_context: 2,
            root_context: 2,
            ..Default::default()
        };
        let session = SamplingSession::new(&sampler, &settings).unwrap();
        let mut collector = ReportCollector::new();
        let summary = session.run(&space.safepoint(), &mut collector);
        let report = collector.into_report();

        let mut out = Vec::new();
        write(&mut out, &summary, &report, 10).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("1 old samples, 1 with a path to a gc root"));
        assert!(text.contains("String at "));
        assert!(text.contains(", site 9)"));
        assert!(text.contains("field next"));
        assert!(text.contains("more ..."));
        assert!(text.contains("root [Globals, Global Handle] static HEAD"));
    }
}
