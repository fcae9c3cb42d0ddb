//! JavaScript evaluated inside LongCat and passport pages.
//!
//! Every script is a single expression; async ones are IIFEs whose promise is
//! awaited by the session. Arguments are spliced in as JSON literals.

use serde::Serialize;

/// Attribute used to tag an element so it can be targeted with a real keyboard.
pub const TARGET_ATTR: &str = "data-lc-target";

/// Selector of the element tagged by [`MARK_EMAIL_INPUT`].
pub const EMAIL_TARGET: &str = "[data-lc-target=\"email\"]";

/// Selector of the element tagged by [`MARK_FIRST_OTP_BOX`].
pub const OTP_TARGET: &str = "[data-lc-target=\"otp\"]";

const IS_VISIBLE: &str = r#"
  const isVisible = (el) => {
    if (!el) return false;
    const st = window.getComputedStyle(el);
    if (!st || st.display === 'none' || st.visibility === 'hidden') return false;
    const op = parseFloat(st.opacity || '1');
    if (!Number.isNaN(op) && op <= 0.01) return false;
    const r = el.getBoundingClientRect();
    return !!r && r.width > 0 && r.height > 0;
  };
"#;

const SET_VALUE: &str = r#"
  const setVal = (el, v) => {
    try {
      const desc = Object.getOwnPropertyDescriptor(Object.getPrototypeOf(el), 'value');
      if (desc && desc.set) desc.set.call(el, v); else el.value = v;
    } catch (e) {
      try { el.value = v; } catch (e2) {}
    }
    for (const kind of ['input', 'change', 'blur']) {
      try { el.dispatchEvent(new Event(kind, { bubbles: true })); } catch (e) {}
    }
  };
  const sleep = (ms) => new Promise((r) => setTimeout(r, ms));
"#;

const PICK_OTP: &str = r#"
  const pickOtp = (count) => {
    const cands = Array.from(document.querySelectorAll('input'))
      .filter((el) => isVisible(el) && el.type !== 'hidden' && !el.disabled)
      .map((el) => ({ el, r: el.getBoundingClientRect() }))
      .filter((x) => x.r.width >= 26 && x.r.width <= 140 && x.r.height >= 26 && x.r.height <= 140)
      .filter((x) => { const ratio = x.r.width / (x.r.height || 1); return ratio >= 0.55 && ratio <= 1.9; });
    cands.sort((a, b) => (a.r.top - b.r.top) || (a.r.left - b.r.left));
    const clusters = [];
    for (const it of cands) {
      const c = clusters.find((c) => Math.abs(it.r.top - c.y) <= 18);
      if (c) {
        c.items.push(it);
        c.y = c.items.reduce((s, t) => s + t.r.top, 0) / c.items.length;
      } else {
        clusters.push({ y: it.r.top, items: [it] });
      }
    }
    let best = null;
    let bestScore = -1e9;
    for (const c of clusters) {
      if (c.items.length < count) continue;
      const score = c.items.length * 1000 - c.y;
      if (score > bestScore) { best = c; bestScore = score; }
    }
    if (!best) return [];
    best.items.sort((a, b) => a.r.left - b.r.left);
    return best.items.slice(0, count).map((x) => x.el);
  };
"#;

const SUBMIT_BUTTON: &str = r#"
  const submitButton = () =>
    document.querySelector('.submit-btn') ||
    document.querySelector('button[type="submit"]') ||
    Array.from(document.querySelectorAll('button')).find((b) => /continue/i.test((b.innerText || '').trim()));
  const submitEnabled = (btn) => {
    if (!btn || !isVisible(btn)) return false;
    if ((btn.getAttribute('aria-disabled') || '').toLowerCase() === 'true') return false;
    return !btn.disabled;
  };
"#;

const DIALOGS: &str = r#"
  const visibleDialogs = () =>
    Array.from(document.querySelectorAll('[role="dialog"],.ant-modal-content,.ant-modal,.modal')).filter(isVisible);
  const formVisible = () => {
    const dlg = visibleDialogs()[0] || null;
    const scope = dlg || document;
    const fields = (root) => Array.from(root.querySelectorAll('textarea,input,select'))
      .filter(isVisible)
      .filter((el) => (el.getAttribute('type') || '').toLowerCase() !== 'hidden');
    if (dlg && fields(scope).length > 0) return true;
    const btn = Array.from(scope.querySelectorAll('button')).filter(isVisible).find((b) => {
      const t = (b.innerText || '').trim();
      const tl = t.toLowerCase();
      return tl.includes('submit') || tl.includes('apply') || tl.includes('continue') || t.includes('提交');
    });
    if (dlg && btn) return true;
    return !!document.querySelector('textarea') && fields(document).some((el) => el.tagName === 'TEXTAREA');
  };
"#;

/// True once the document finished loading.
pub const DOCUMENT_READY: &str = "document.readyState === 'complete'";

/// Tag the most email-like input with [`TARGET_ATTR`].
pub const MARK_EMAIL_INPUT: &str = r#"(() => {
  try {
    __VISIBLE__
    let best = null;
    let bestScore = -1e9;
    for (const el of document.querySelectorAll('input')) {
      if (!isVisible(el) || el.disabled) continue;
      const type = (el.getAttribute('type') || 'text').toLowerCase();
      const hint = ['placeholder', 'aria-label', 'name', 'id']
        .map((a) => (el.getAttribute(a) || '').toLowerCase())
        .join(' ');
      let score = 0;
      if (type === 'email') score += 100;
      if (hint.includes('email') || hint.includes('e-mail')) score += 80;
      if (type === 'text' || type === 'email') score += 10;
      if (el.getAttribute('maxlength') === '1') score -= 200;
      if (hint.includes('code') || hint.includes('verification')) score -= 50;
      if (score > bestScore) { best = el; bestScore = score; }
    }
    if (!best || bestScore < 0) return false;
    document.querySelectorAll('[data-lc-target="email"]').forEach((el) => el.removeAttribute('data-lc-target'));
    best.setAttribute('data-lc-target', 'email');
    return true;
  } catch (e) {
    return false;
  }
})()"#;

/// Click `.submit-btn`, then `button[type=submit]`, then a "Continue" button.
pub const CLICK_CONTINUE: &str = r#"(() => {
  try {
    __VISIBLE__
    const btn =
      Array.from(document.querySelectorAll('.submit-btn')).find(isVisible) ||
      Array.from(document.querySelectorAll('button[type="submit"]')).find(isVisible) ||
      Array.from(document.querySelectorAll('button,[role="button"]'))
        .filter(isVisible)
        .find((b) => (b.innerText || '').trim().toLowerCase() === 'continue');
    if (!btn) return false;
    btn.click();
    return true;
  } catch (e) {
    return false;
  }
})()"#;

/// Tag the first OTP digit box with [`TARGET_ATTR`].
pub const MARK_FIRST_OTP_BOX: &str = r#"(() => {
  try {
    __VISIBLE__
    __PICK_OTP__
    const boxes = pickOtp(4);
    const first = boxes[0] ||
      Array.from(document.querySelectorAll('input')).filter(isVisible).find((el) => {
        const hint = ((el.getAttribute('placeholder') || '') + ' ' + (el.getAttribute('name') || '')).toLowerCase();
        return hint.includes('code') || hint.includes('otp');
      });
    if (!first) return false;
    document.querySelectorAll('[data-lc-target="otp"]').forEach((el) => el.removeAttribute('data-lc-target'));
    first.setAttribute('data-lc-target', 'otp');
    return true;
  } catch (e) {
    return false;
  }
})()"#;

/// Whether the OTP submit button is visible and enabled.
pub const OTP_SUBMIT_ENABLED: &str = r#"(() => {
  try {
    __VISIBLE__
    __SUBMIT__
    return submitEnabled(submitButton());
  } catch (e) {
    return false;
  }
})()"#;

/// Click the OTP submit button when it is enabled.
pub const CLICK_OTP_SUBMIT: &str = r#"(() => {
  try {
    __VISIBLE__
    __SUBMIT__
    const btn = submitButton();
    if (!submitEnabled(btn)) return false;
    btn.click();
    return true;
  } catch (e) {
    return false;
  }
})()"#;

/// `GET /api/v1/user-current` with the page's cookies, 12 s cap.
pub const USER_CURRENT: &str = r#"(async () => {
  try {
    const req = fetch('https://longcat.chat/api/v1/user-current', {
      method: 'GET',
      credentials: 'include',
      headers: { 'x-requested-with': 'XMLHttpRequest' }
    }).then((r) => r.json());
    const timeout = new Promise((_, reject) => setTimeout(() => reject(new Error('timeout')), 12000));
    return await Promise.race([req, timeout]);
  } catch (e) {
    return null;
  }
})()"#;

/// Nudge scrolling so lazy sections render.
pub const SCROLL_NUDGE: &str = r#"(() => {
  try {
    window.scrollTo(0, 0);
    setTimeout(() => window.scrollTo(0, document.body.scrollHeight), 150);
    setTimeout(() => window.scrollTo(0, 0), 300);
    return true;
  } catch (e) {
    return false;
  }
})()"#;

/// Redirect `window.open` into the current tab and remember the target.
pub const INSTALL_OPEN_TRAP: &str = r#"(() => {
  try {
    window.__lc_opened_url = '';
    const origOpen = window.open;
    window.open = function (url) {
      try {
        window.__lc_opened_url = String(url || '');
        if (url) location.href = url;
      } catch (e) {}
      try { return origOpen.apply(this, arguments); } catch (e) { return null; }
    };
    return true;
  } catch (e) {
    return false;
  }
})()"#;

/// URL captured by [`INSTALL_OPEN_TRAP`], or `''`.
pub const OPENED_URL: &str = "(() => { try { return window.__lc_opened_url || ''; } catch (e) { return ''; } })()";

/// Number of visible dialogs.
pub const DIALOG_COUNT: &str = r#"(() => {
  try {
    __VISIBLE__
    __DIALOGS__
    return visibleDialogs().length;
  } catch (e) {
    return 0;
  }
})()"#;

/// True once the quota form is gone.
pub const QUOTA_FORM_CLOSED: &str = r#"(() => {
  try {
    __VISIBLE__
    __DIALOGS__
    return !formVisible();
  } catch (e) {
    return false;
  }
})()"#;

const HAS_TEXT: &str = r#"(() => {
  try {
    const body = document.body ? (document.body.innerText || '') : '';
    return __NEEDLES__.some((n) => body.includes(n));
  } catch (e) {
    return false;
  }
})()"#;

const URL_CONTAINS: &str = "(() => { try { return location.href.includes(__NEEDLE__); } catch (e) { return false; } })()";

const CLICK_TEXT: &str = r#"(() => {
  try {
    __VISIBLE__
    const labels = __LABELS__.map((l) => l.trim().toLowerCase());
    const nodes = Array.from(document.querySelectorAll('button,a,[role="button"],div,span,p'))
      .filter(isVisible)
      .filter((el) => labels.includes((el.innerText || '').trim().toLowerCase()));
    if (nodes.length === 0) return false;
    // Deepest match is the actual control rather than a wrapper.
    const target = nodes.find((el) => !nodes.some((o) => o !== el && el.contains(o))) || nodes[0];
    target.click();
    return true;
  } catch (e) {
    return false;
  }
})()"#;

const SET_OTP: &str = r#"(() => {
  try {
    __VISIBLE__
    const code = __CODE__;
    const nativeSet = Object.getOwnPropertyDescriptor(HTMLInputElement.prototype, 'value')?.set;
    __PICK_OTP__
    const target = pickOtp(code.length);
    if (target.length < code.length) return false;
    const put = (el, v) => {
      if (nativeSet) nativeSet.call(el, v); else el.value = v;
      el.dispatchEvent(new Event('input', { bubbles: true }));
      el.dispatchEvent(new Event('change', { bubbles: true }));
    };
    for (const el of target) { try { put(el, ''); } catch (e) {} }
    target.forEach((el, i) => {
      try { el.focus(); put(el, code[i]); } catch (e) {}
    });
    return true;
  } catch (e) {
    return false;
  }
})()"#;

const CREATE_KEY: &str = r#"(async () => {
  try {
    const req = fetch('https://longcat.chat/api/lc-platform/v1/create-apiKeys', {
      method: 'POST',
      credentials: 'include',
      headers: {
        'content-type': 'application/json',
        'x-requested-with': 'XMLHttpRequest',
        'x-client-language': 'zh'
      },
      body: JSON.stringify({ name: __NAME__ })
    });
    const timeout = new Promise((_, reject) => setTimeout(() => reject(new Error('timeout')), 15000));
    const resp = await Promise.race([req, timeout]);
    return {
      ok: resp.ok,
      status: resp.status,
      url: resp.url,
      content_type: resp.headers.get('content-type') || '',
      text: await resp.text()
    };
  } catch (e) {
    return { ok: false, status: 0, url: '', content_type: '', text: '', error: String(e) };
  }
})()"#;

const CLICK_QUOTA_BUTTON: &str = r#"(() => {
  try {
    __VISIBLE__
    const labels = __LABELS__;
    const nodes = Array.from(document.querySelectorAll('button,a,[role="button"],span,div')).filter(isVisible);
    let best = null;
    let bestScore = 0;
    for (const el of nodes) {
      const t = (el.innerText || '').trim();
      if (!t || t.length > 40) continue;
      const tl = t.toLowerCase();
      let score = 0;
      for (const l of labels) {
        const ll = l.toLowerCase();
        if (tl === ll) score = Math.max(score, 100);
        else if (tl.includes(ll)) score = Math.max(score, 50);
      }
      if (score === 0 && (t.includes('额度') || t.includes('配额') || tl.includes('quota'))) score = 30;
      if (score === 0) continue;
      const tag = el.tagName.toLowerCase();
      if (tag === 'button' || el.getAttribute('role') === 'button') score += 20;
      else if (tag === 'a') score += 10;
      if (score > bestScore) { best = el; bestScore = score; }
    }
    if (!best) return false;
    best.scrollIntoView({ block: 'center' });
    best.click();
    return true;
  } catch (e) {
    return false;
  }
})()"#;

const QUOTA_FORM_OPENED: &str = r#"(() => {
  try {
    __VISIBLE__
    __DIALOGS__
    return visibleDialogs().length > __BEFORE__ || formVisible();
  } catch (e) {
    return false;
  }
})()"#;

const FILL_QUOTA_FORM: &str = r#"(async () => {
  try {
    __VISIBLE__
    __SET_VALUE__
    __DIALOGS__
    const industry = __INDUSTRY__;
    const scenario = __SCENARIO__;
    const scope = visibleDialogs()[0] || document;
    const visibles = (sel) => Array.from(scope.querySelectorAll(sel))
      .filter(isVisible)
      .filter((el) => (el.getAttribute('type') || '').toLowerCase() !== 'hidden');
    const byPlaceholder = (sel, needles) => visibles(sel).find((el) => {
      const ph = el.getAttribute('placeholder') || '';
      return needles.some((n) => ph.includes(n) || ph.toLowerCase().includes(n));
    }) || null;
    const pickFirstOption = async (input) => {
      try { input.click(); } catch (e) {}
      await sleep(250);
      const opt = Array.from(document.querySelectorAll('.ant-select-item-option'))
        .filter(isVisible)
        .find((o) => !o.classList.contains('ant-select-item-option-disabled'));
      if (opt) { opt.click(); await sleep(150); return true; }
      return false;
    };
    const selectedText = (input) => {
      if (!input) return '';
      const v = (input.value || '').trim();
      if (v) return v;
      const root = input.closest ? input.closest('.ant-select') : null;
      const item = root ? root.querySelector('.ant-select-selection-item') : null;
      return item ? (item.innerText || '').trim() : '';
    };

    let okScenario = false;
    const ta = visibles('textarea')[0] || byPlaceholder('input,textarea', ['场景', 'scenario']);
    if (ta) { setVal(ta, scenario || 'Chatbot'); okScenario = true; }

    let okIndustry = false;
    const industryInput = byPlaceholder('input', ['行业', 'industry']);
    if (industryInput) {
      if (!selectedText(industryInput) && !(await pickFirstOption(industryInput))) {
        setVal(industryInput, industry || 'Internet');
        industryInput.dispatchEvent(new KeyboardEvent('keydown', { key: 'Enter', bubbles: true }));
        await sleep(150);
      }
      okIndustry = !!selectedText(industryInput);
    }

    const company = byPlaceholder('input', ['公司', 'company']);
    if (company && !(company.value || '').trim()) setVal(company, 'Acme');

    const job = byPlaceholder('input', ['职务', 'job', 'position']);
    if (job && !selectedText(job)) await pickFirstOption(job);

    const isChecked = () =>
      Array.from(scope.querySelectorAll('input[type="checkbox"]')).some((i) => i.checked) ||
      !!scope.querySelector('.ant-checkbox-checked') ||
      Array.from(scope.querySelectorAll('[role="checkbox"]')).some((r) => (r.getAttribute('aria-checked') || '') === 'true');
    const clickBox = (el) => {
      const tgt = el.querySelector('.ant-checkbox-inner') || el.querySelector('.ant-checkbox') || el;
      try { tgt.click(); } catch (e) {}
    };
    const body = scope.querySelector ? (scope.querySelector('.ant-modal-body') || null) : null;
    if (body) body.scrollTop = 1e9;
    if (!isChecked()) {
      const needles = ['用户协议', '隐私政策', '我已阅读', 'agree', 'privacy', 'terms'];
      const hit = Array.from(scope.querySelectorAll('label,span,div')).filter(isVisible).find((el) => {
        const t = (el.innerText || '').trim();
        return t && t.length < 200 && needles.some((n) => t.includes(n) || t.toLowerCase().includes(n));
      });
      if (hit) { clickBox(hit.closest('label') || hit); await sleep(150); }
    }
    if (!isChecked()) {
      for (const cb of Array.from(scope.querySelectorAll('input[type="checkbox"]')).slice(0, 8)) {
        if (cb.checked) continue;
        const wrap = cb.closest('label') || cb.closest('.ant-checkbox-wrapper') || cb.parentElement;
        if (wrap) clickBox(wrap);
        await sleep(120);
        if (!cb.checked) {
          cb.checked = true;
          cb.dispatchEvent(new Event('change', { bubbles: true }));
        }
      }
    }
    const agreed = isChecked();
    await sleep(350);

    let submitted = false;
    let submitDisabled = null;
    const btns = visibles('button');
    const submit = btns.find((b) => b.classList.contains('ant-btn-primary')) ||
      btns.find((b) => {
        const t = (b.innerText || '').trim();
        return t.includes('提交') || t.toLowerCase().includes('submit');
      });
    if (submit) {
      const cls = submit.getAttribute('class') || '';
      submitDisabled = !!submit.disabled ||
        (submit.getAttribute('aria-disabled') || '').toLowerCase() === 'true' ||
        cls.includes('disabled');
      if (!submitDisabled) { submit.click(); submitted = true; }
    }
    return { okIndustry, okScenario, agreed, submitted, submitDisabled, url: location.href };
  } catch (e) {
    return { error: String(e), url: location.href };
  }
})()"#;

fn literal<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Expand shared helper blocks in a template.
fn expand(template: &str) -> String {
    template
        .replace("__VISIBLE__", IS_VISIBLE)
        .replace("__SET_VALUE__", SET_VALUE)
        .replace("__PICK_OTP__", PICK_OTP)
        .replace("__SUBMIT__", SUBMIT_BUTTON)
        .replace("__DIALOGS__", DIALOGS)
}

/// A static script with helpers expanded.
#[must_use]
pub fn script(template: &str) -> String {
    expand(template)
}

/// True when the page text contains any of `needles`.
#[must_use]
pub fn has_text(needles: &[&str]) -> String {
    HAS_TEXT.replace("__NEEDLES__", &literal(needles))
}

/// True when `location.href` contains `needle`.
#[must_use]
pub fn url_contains(needle: &str) -> String {
    URL_CONTAINS.replace("__NEEDLE__", &literal(needle))
}

/// Click the innermost visible element whose text equals one of `labels`.
#[must_use]
pub fn click_text(labels: &[&str]) -> String {
    expand(CLICK_TEXT).replace("__LABELS__", &literal(labels))
}

/// Fill OTP digit boxes through the native value setter.
#[must_use]
pub fn set_otp(code: &str) -> String {
    expand(SET_OTP).replace("__CODE__", &literal(code))
}

/// Authenticated in-page `POST create-apiKeys`.
#[must_use]
pub fn create_key(name: &str) -> String {
    CREATE_KEY.replace("__NAME__", &literal(name))
}

/// Click the best "apply more quota" candidate.
#[must_use]
pub fn click_quota_button(labels: &[&str]) -> String {
    expand(CLICK_QUOTA_BUTTON).replace("__LABELS__", &literal(labels))
}

/// True once a dialog beyond `before` or the quota form is visible.
#[must_use]
pub fn quota_form_opened(before: u64) -> String {
    expand(QUOTA_FORM_OPENED).replace("__BEFORE__", &before.to_string())
}

/// Fill the quota form, tick the agreement and submit.
#[must_use]
pub fn fill_quota_form(industry: &str, scenario: &str) -> String {
    expand(FILL_QUOTA_FORM)
        .replace("__INDUSTRY__", &literal(industry))
        .replace("__SCENARIO__", &literal(scenario))
}
