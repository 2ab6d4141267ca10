//! Global symbol resolution and archive member liveness. Resolution binds
//! each global name to its first definer; the liveness walk then pulls in
//! exactly the archive members whose definitions are (transitively)
//! referenced from the command-line objects.

use crate::context::Context;
use crate::context::ObjectId;
use crate::error::Result;
use crate::symbol::SymbolRef;
use anyhow::ensure;
use std::collections::VecDeque;

#[tracing::instrument(skip_all, name = "Symbol resolution")]
pub(crate) fn resolve_symbols(ctx: &mut Context) -> Result {
    for i in 0..ctx.objects.len() {
        let Context {
            objects, symbol_db, ..
        } = ctx;
        objects[i].resolve_symbols(ObjectId::new(i), symbol_db);
    }

    mark_live_objects(ctx)?;

    // Objects that are still dead contributed definitions nobody needed.
    // Un-bind those so they can't be referenced by later passes.
    for i in 0..ctx.objects.len() {
        if ctx.objects[i].is_alive {
            continue;
        }
        let Context {
            objects, symbol_db, ..
        } = ctx;
        objects[i].clear_symbols(ObjectId::new(i), symbol_db);
    }

    ctx.live_objects = (0..ctx.objects.len())
        .filter(|&i| ctx.objects[i].is_alive)
        .map(ObjectId::new)
        .collect();
    Ok(())
}

/// Breadth-first walk over undefined symbol references. Command-line objects
/// seed the queue; whenever a dead object turns out to define a symbol that
/// a live object needs, it becomes live and joins the queue.
fn mark_live_objects(ctx: &mut Context) -> Result {
    let mut roots: VecDeque<ObjectId> = (0..ctx.objects.len())
        .filter(|&i| ctx.objects[i].is_alive)
        .map(ObjectId::new)
        .collect();
    ensure!(!roots.is_empty(), "no input files");

    while let Some(oid) = roots.pop_front() {
        let mut newly_live = Vec::new();
        let obj = &ctx.objects[oid.as_usize()];
        for i in obj.first_global..obj.elf_syms.len() {
            if !obj.elf_syms[i].is_undef() {
                continue;
            }
            let SymbolRef::Global(id) = obj.symbols[i] else {
                continue;
            };
            let Some(definer) = ctx.symbol_db.symbol(id).file else {
                continue;
            };
            if !ctx.objects[definer.as_usize()].is_alive {
                newly_live.push(definer);
            }
        }
        for definer in newly_live {
            let definer_obj = &mut ctx.objects[definer.as_usize()];
            if !definer_obj.is_alive {
                definer_obj.is_alive = true;
                roots.push_back(definer);
            }
        }
    }
    Ok(())
}
